//! Rede P2P do nó Umbra
//!
//! Transporte real com rust-libp2p (TCP + noise + yamux), gossipsub para os
//! tópicos de consenso e mDNS para descoberta local. O `ProtocolHandler`
//! traduz as mensagens de consenso em chamadas ao núcleo e é independente do
//! transporte; o `P2PNode` faz o laço de eventos do swarm.

use futures::StreamExt;
use libp2p::{
    gossipsub, mdns, noise,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour, SwarmEvent},
    tcp, yamux, PeerId, Swarm, SwarmBuilder,
};
use serde::{Deserialize, Serialize};
use shared::{Hash256, NodeError, Result as NodeResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};
use umbra_core::block::{BlockTemplate, RawBlock};
use umbra_core::core::Core;
use umbra_core::currency::CHAIN_SYNC_MAX_HASH_COUNT;
use umbra_core::error::AddBlockError;
use umbra_core::messages::BlockchainMessage;
use umbra_core::serialization::ConsensusDecode;
use umbra_core::transaction::CachedTransaction;

/// Configuração da rede P2P
#[derive(Debug, Clone)]
pub struct P2PConfig {
    pub listen_addr: String,
    pub port: u16,
    pub bootstrap_nodes: Vec<String>,
    pub network_id: String,
    pub enable_mdns: bool,
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            port: 0, // Porta aleatória por padrão
            bootstrap_nodes: vec![],
            network_id: "umbra-devnet".to_string(),
            enable_mdns: true,
        }
    }
}

/// Mensagens do protocolo de consenso trocadas entre pares
///
/// Pedidos e respostas dirigidos carregam o par de destino em `to`; os
/// demais pares ignoram a mensagem ao vê-la no gossip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// Um bloco completo recém-aceito
    NewBlock { raw_block: RawBlock, height: u32 },
    /// Um bloco sem os corpos das transações; o receptor materializa do pool
    NewLiteBlock { block: Vec<u8>, height: u32 },
    /// Corpos de transações para o pool
    NewTransactions { transactions: Vec<Vec<u8>> },
    /// Pedido de sincronização: cadeia esparsa dos hashes conhecidos
    RequestChain {
        to: String,
        known_hashes: Vec<Hash256>,
    },
    /// Cauda da cadeia principal após o último bloco comum
    ResponseChainEntry {
        to: String,
        start_index: u32,
        total_count: u32,
        hashes: Vec<Hash256>,
    },
    /// Pedido de blocos completos por hash
    RequestGetObjects { to: String, blocks: Vec<Hash256> },
    /// Blocos pedidos; hashes não encontrados voltam em `missed`
    ResponseGetObjects {
        to: String,
        blocks: Vec<RawBlock>,
        missed: Vec<Hash256>,
        current_height: u32,
    },
    /// Transações que faltam para montar um lite block
    RequestMissingTransactions {
        to: String,
        block_hash: Hash256,
        transactions: Vec<Hash256>,
    },
    ResponseMissingTransactions {
        to: String,
        block_hash: Hash256,
        transactions: Vec<Vec<u8>>,
    },
    /// Sincronização do pool contra um conjunto conhecido
    RequestTxPool {
        to: String,
        known_hashes: Vec<Hash256>,
    },
}

impl ProtocolMessage {
    /// Par de destino de mensagens dirigidas
    fn addressed_to(&self) -> Option<&str> {
        match self {
            Self::RequestChain { to, .. }
            | Self::ResponseChainEntry { to, .. }
            | Self::RequestGetObjects { to, .. }
            | Self::ResponseGetObjects { to, .. }
            | Self::RequestMissingTransactions { to, .. }
            | Self::ResponseMissingTransactions { to, .. }
            | Self::RequestTxPool { to, .. } => Some(to),
            _ => None,
        }
    }
}

/// Ações que o handler pede de volta ao transporte
#[derive(Debug)]
pub enum HandlerAction {
    /// Publica a mensagem no tópico apropriado
    Publish(ProtocolMessage),
    /// O par violou o protocolo; derruba a conexão
    DropPeer,
}

/// Lite block aguardando os corpos das transações de um par
#[derive(Debug)]
struct PendingLiteBlock {
    block: Vec<u8>,
    missing: Vec<Hash256>,
}

/// Tradutor das mensagens de consenso em chamadas ao núcleo
pub struct ProtocolHandler {
    core: Arc<RwLock<Core>>,
    observed_heights: HashMap<String, u32>,
    pending_lite_blocks: HashMap<String, PendingLiteBlock>,
    outstanding_objects: HashMap<String, HashSet<Hash256>>,
    observed_height: watch::Sender<u32>,
}

impl ProtocolHandler {
    #[must_use]
    pub fn new(core: Arc<RwLock<Core>>) -> Self {
        let (observed_height, _) = watch::channel(0);
        Self {
            core,
            observed_heights: HashMap::new(),
            pending_lite_blocks: HashMap::new(),
            outstanding_objects: HashMap::new(),
            observed_height,
        }
    }

    /// Altura observada da rede, publicada como observável
    #[must_use]
    pub fn observed_height(&self) -> watch::Receiver<u32> {
        self.observed_height.subscribe()
    }

    fn update_observed_height(&mut self, peer_id: &str, height: u32) {
        self.observed_heights.insert(peer_id.to_string(), height);
        let max = self.observed_heights.values().copied().max().unwrap_or(0);
        let _ = self.observed_height.send(max);
    }

    /// Um par se foi; recalcula a altura observada
    pub fn peer_disconnected(&mut self, peer_id: &str) {
        self.observed_heights.remove(peer_id);
        self.pending_lite_blocks.remove(peer_id);
        self.outstanding_objects.remove(peer_id);
        let max = self.observed_heights.values().copied().max().unwrap_or(0);
        let _ = self.observed_height.send(max);
    }

    /// Processa uma mensagem de um par e devolve as reações
    pub async fn handle_message(
        &mut self,
        peer_id: &str,
        message: ProtocolMessage,
    ) -> Vec<HandlerAction> {
        match message {
            ProtocolMessage::NewBlock { raw_block, height } => {
                self.update_observed_height(peer_id, height);
                self.ingest_block(peer_id, raw_block, true).await
            }

            ProtocolMessage::NewLiteBlock { block, height } => {
                self.update_observed_height(peer_id, height);
                self.handle_lite_block(peer_id, block).await
            }

            ProtocolMessage::NewTransactions { transactions } => {
                let mut accepted = Vec::new();
                {
                    let mut core = self.core.write().await;
                    for transaction in transactions {
                        if core.add_transaction_to_pool(&transaction) {
                            accepted.push(transaction);
                        }
                    }
                }

                if accepted.is_empty() {
                    vec![]
                } else {
                    // Repassa adiante só o que o pool aceitou
                    vec![HandlerAction::Publish(ProtocolMessage::NewTransactions {
                        transactions: accepted,
                    })]
                }
            }

            ProtocolMessage::RequestChain { known_hashes, .. } => {
                let core = self.core.read().await;
                match core.find_blockchain_supplement(&known_hashes, CHAIN_SYNC_MAX_HASH_COUNT) {
                    Some((hashes, total_count, start_index)) => {
                        vec![HandlerAction::Publish(ProtocolMessage::ResponseChainEntry {
                            to: peer_id.to_string(),
                            start_index,
                            total_count,
                            hashes,
                        })]
                    }
                    None => {
                        warn!(peer_id, "Par sem nenhum bloco em comum; derrubando");
                        vec![HandlerAction::DropPeer]
                    }
                }
            }

            ProtocolMessage::ResponseChainEntry {
                total_count,
                hashes,
                ..
            } => {
                self.update_observed_height(peer_id, total_count.saturating_sub(1));

                let missing: Vec<Hash256> = {
                    let core = self.core.read().await;
                    hashes
                        .into_iter()
                        .filter(|hash| !core.has_block(hash))
                        .collect()
                };

                if missing.is_empty() {
                    return vec![];
                }

                self.outstanding_objects
                    .entry(peer_id.to_string())
                    .or_default()
                    .extend(missing.iter().copied());

                vec![HandlerAction::Publish(ProtocolMessage::RequestGetObjects {
                    to: peer_id.to_string(),
                    blocks: missing,
                })]
            }

            ProtocolMessage::RequestGetObjects { blocks, .. } => {
                let core = self.core.read().await;
                let (found, missed) = core.blocks_by_hashes(&blocks);
                vec![HandlerAction::Publish(ProtocolMessage::ResponseGetObjects {
                    to: peer_id.to_string(),
                    blocks: found,
                    missed,
                    current_height: core.top_block_index(),
                })]
            }

            ProtocolMessage::ResponseGetObjects {
                blocks,
                current_height,
                ..
            } => {
                self.update_observed_height(peer_id, current_height);
                self.handle_objects_response(peer_id, blocks).await
            }

            ProtocolMessage::RequestMissingTransactions {
                block_hash,
                transactions,
                ..
            } => {
                let core = self.core.read().await;
                let mut found = Vec::new();
                for hash in &transactions {
                    if let Some(binary) = core.transaction(hash) {
                        found.push(binary);
                    }
                }
                vec![HandlerAction::Publish(
                    ProtocolMessage::ResponseMissingTransactions {
                        to: peer_id.to_string(),
                        block_hash,
                        transactions: found,
                    },
                )]
            }

            ProtocolMessage::ResponseMissingTransactions {
                block_hash,
                transactions,
                ..
            } => {
                self.handle_missing_transactions_response(peer_id, block_hash, transactions)
                    .await
            }

            ProtocolMessage::RequestTxPool { known_hashes, .. } => {
                let core = self.core.read().await;
                let known: HashSet<Hash256> = known_hashes.into_iter().collect();
                let added: Vec<Vec<u8>> = core
                    .pool_transaction_hashes()
                    .into_iter()
                    .filter(|hash| !known.contains(hash))
                    .filter_map(|hash| core.pool_transaction(&hash))
                    .collect();

                if added.is_empty() {
                    vec![]
                } else {
                    vec![HandlerAction::Publish(ProtocolMessage::NewTransactions {
                        transactions: added,
                    })]
                }
            }
        }
    }

    /// Ingestão de um bloco completo; órfãos disparam sincronização
    async fn ingest_block(
        &mut self,
        peer_id: &str,
        raw_block: RawBlock,
        relay: bool,
    ) -> Vec<HandlerAction> {
        let result = {
            let mut core = self.core.write().await;
            core.add_block(raw_block.clone())
        };

        match result {
            Ok(outcome) => {
                use umbra_core::error::AddBlockResult::{
                    AddedToAlternativeAndSwitched, AddedToMain,
                };
                debug!(peer_id, ?outcome, "Bloco do par processado");
                if relay && matches!(outcome, AddedToMain | AddedToAlternativeAndSwitched) {
                    let height = self.core.read().await.top_block_index();
                    vec![HandlerAction::Publish(ProtocolMessage::NewBlock {
                        raw_block,
                        height,
                    })]
                } else {
                    vec![]
                }
            }
            Err(AddBlockError::RejectedAsOrphaned) => {
                // Não conhecemos o pai: pede a cadeia a partir do que temos
                let known_hashes = self.core.read().await.build_sparse_chain();
                vec![HandlerAction::Publish(ProtocolMessage::RequestChain {
                    to: peer_id.to_string(),
                    known_hashes,
                })]
            }
            Err(err) => {
                warn!(peer_id, error = %err, "Bloco inválido recebido; derrubando o par");
                vec![HandlerAction::DropPeer]
            }
        }
    }

    async fn handle_lite_block(&mut self, peer_id: &str, block: Vec<u8>) -> Vec<HandlerAction> {
        let Ok(template) = BlockTemplate::from_binary(&block) else {
            warn!(peer_id, "Lite block indecifrável; derrubando o par");
            return vec![HandlerAction::DropPeer];
        };

        let (bodies, missing) = {
            let core = self.core.read().await;
            let mut bodies = Vec::new();
            let mut missing = Vec::new();
            for hash in &template.transaction_hashes {
                match core.transaction(hash) {
                    Some(binary) => bodies.push(binary),
                    None => missing.push(*hash),
                }
            }
            (bodies, missing)
        };

        if missing.is_empty() {
            return self
                .ingest_block(
                    peer_id,
                    RawBlock {
                        block,
                        transactions: bodies,
                    },
                    true,
                )
                .await;
        }

        debug!(peer_id, missing = missing.len(), "Lite block aguardando transações");
        let block_hash = umbra_core::block::CachedBlock::new(template).hash();
        self.pending_lite_blocks.insert(
            peer_id.to_string(),
            PendingLiteBlock {
                block,
                missing: missing.clone(),
            },
        );

        vec![HandlerAction::Publish(
            ProtocolMessage::RequestMissingTransactions {
                to: peer_id.to_string(),
                block_hash,
                transactions: missing,
            },
        )]
    }

    async fn handle_missing_transactions_response(
        &mut self,
        peer_id: &str,
        _block_hash: Hash256,
        transactions: Vec<Vec<u8>>,
    ) -> Vec<HandlerAction> {
        let Some(pending) = self.pending_lite_blocks.remove(peer_id) else {
            return vec![];
        };

        // O par precisa entregar exatamente o que faltava
        let mut by_hash: HashMap<Hash256, Vec<u8>> = HashMap::new();
        for binary in transactions {
            match CachedTransaction::from_binary(&binary) {
                Ok(cached) => {
                    by_hash.insert(cached.hash(), binary);
                }
                Err(_) => {
                    warn!(peer_id, "Transação indecifrável na resposta; derrubando o par");
                    return vec![HandlerAction::DropPeer];
                }
            }
        }

        let Ok(template) = BlockTemplate::from_binary(&pending.block) else {
            return vec![];
        };

        let core = Arc::clone(&self.core);
        let mut bodies = Vec::with_capacity(template.transaction_hashes.len());
        for hash in &template.transaction_hashes {
            if let Some(binary) = by_hash.get(hash) {
                bodies.push(binary.clone());
            } else if let Some(binary) = core.read().await.transaction(hash) {
                bodies.push(binary);
            } else if pending.missing.contains(hash) {
                warn!(peer_id, missing = %hash, "Par não entregou a transação pedida");
                return vec![HandlerAction::DropPeer];
            } else {
                return vec![];
            }
        }

        self.ingest_block(
            peer_id,
            RawBlock {
                block: pending.block,
                transactions: bodies,
            },
            true,
        )
        .await
    }

    /// Respostas de objetos só valem para pedidos em aberto
    async fn handle_objects_response(
        &mut self,
        peer_id: &str,
        blocks: Vec<RawBlock>,
    ) -> Vec<HandlerAction> {
        let Some(outstanding) = self.outstanding_objects.get_mut(peer_id) else {
            warn!(peer_id, "Resposta de objetos sem pedido em aberto; derrubando");
            return vec![HandlerAction::DropPeer];
        };

        for raw in &blocks {
            let Ok(cached) = umbra_core::block::CachedBlock::from_binary(&raw.block) else {
                warn!(peer_id, "Bloco indecifrável na resposta; derrubando o par");
                return vec![HandlerAction::DropPeer];
            };
            if !outstanding.remove(&cached.hash()) {
                warn!(peer_id, "Bloco não pedido na resposta; derrubando o par");
                return vec![HandlerAction::DropPeer];
            }
        }

        if self
            .outstanding_objects
            .get(peer_id)
            .is_some_and(HashSet::is_empty)
        {
            self.outstanding_objects.remove(peer_id);
        }

        // Blocos chegam do mais antigo para o mais novo
        let mut actions = Vec::new();
        for raw in blocks {
            let mut reaction = self.ingest_block(peer_id, raw, false).await;
            actions.append(&mut reaction);
            if actions
                .iter()
                .any(|action| matches!(action, HandlerAction::DropPeer))
            {
                return actions;
            }
        }

        // Continua a sincronização se o par ainda está à frente
        let top = self.core.read().await.top_block_index();
        let peer_height = self.observed_heights.get(peer_id).copied().unwrap_or(0);
        if peer_height > top {
            let known_hashes = self.core.read().await.build_sparse_chain();
            actions.push(HandlerAction::Publish(ProtocolMessage::RequestChain {
                to: peer_id.to_string(),
                known_hashes,
            }));
        }

        actions
    }
}

/// Comportamentos de rede do nó
#[derive(NetworkBehaviour)]
struct UmbraBehaviour {
    gossipsub: gossipsub::Behaviour,
    mdns: Toggle<mdns::tokio::Behaviour>,
}

/// Nó P2P: swarm libp2p + handler de protocolo + fan-out do núcleo
pub struct P2PNode {
    config: P2PConfig,
    local_peer_id: PeerId,
    swarm: Swarm<UmbraBehaviour>,
    handler: ProtocolHandler,
    core: Arc<RwLock<Core>>,
    notifications: broadcast::Receiver<BlockchainMessage>,
    block_topic: gossipsub::IdentTopic,
    tx_topic: gossipsub::IdentTopic,
    sync_topic: gossipsub::IdentTopic,
}

impl P2PNode {
    /// Cria o nó, monta o transporte e se inscreve nos tópicos
    ///
    /// # Errors
    ///
    /// Retorna erro se o transporte ou o gossipsub não puderem ser montados
    pub async fn new(config: P2PConfig, core: Arc<RwLock<Core>>) -> NodeResult<Self> {
        let notifications = core.read().await.subscribe();

        let network_id = config.network_id.clone();
        let block_topic = gossipsub::IdentTopic::new(format!("{network_id}/blocks"));
        let tx_topic = gossipsub::IdentTopic::new(format!("{network_id}/transactions"));
        let sync_topic = gossipsub::IdentTopic::new(format!("{network_id}/sync"));
        let enable_mdns = config.enable_mdns;

        let mut swarm = SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|err| NodeError::NetworkError(err.to_string()))?
            .with_behaviour(|key| {
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .heartbeat_interval(Duration::from_secs(10))
                    .max_transmit_size(4 * 1024 * 1024)
                    .build()
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )?;

                let mdns = if enable_mdns {
                    Some(mdns::tokio::Behaviour::new(
                        mdns::Config::default(),
                        key.public().to_peer_id(),
                    )?)
                } else {
                    None
                };

                Ok(UmbraBehaviour {
                    gossipsub,
                    mdns: Toggle::from(mdns),
                })
            })
            .map_err(|err| NodeError::NetworkError(err.to_string()))?
            .with_swarm_config(|swarm_config| {
                swarm_config.with_idle_connection_timeout(Duration::from_secs(60))
            })
            .build();

        let local_peer_id = *swarm.local_peer_id();
        info!(%local_peer_id, "Nó P2P criado");

        for topic in [&block_topic, &tx_topic, &sync_topic] {
            swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(topic)
                .map_err(|err| NodeError::NetworkError(err.to_string()))?;
        }

        let handler = ProtocolHandler::new(Arc::clone(&core));

        Ok(Self {
            config,
            local_peer_id,
            swarm,
            handler,
            core,
            notifications,
            block_topic,
            tx_topic,
            sync_topic,
        })
    }

    /// Altura observada da rede, como observável
    #[must_use]
    pub fn observed_height(&self) -> watch::Receiver<u32> {
        self.handler.observed_height()
    }

    /// Escuta, conecta aos bootstrap e roda o laço de eventos até o sinal
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de escuta ou endereço de bootstrap inválido
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> NodeResult<()> {
        let listen_addr = format!("/ip4/{}/tcp/{}", self.config.listen_addr, self.config.port);
        self.swarm
            .listen_on(
                listen_addr
                    .parse()
                    .map_err(|err| NodeError::NetworkError(format!("Endereço inválido: {err}")))?,
            )
            .map_err(|err| NodeError::NetworkError(err.to_string()))?;

        for bootstrap in self.config.bootstrap_nodes.clone() {
            info!(address = %bootstrap, "Conectando ao bootstrap");
            let address: libp2p::Multiaddr = bootstrap
                .parse()
                .map_err(|err| NodeError::NetworkError(format!("Bootstrap inválido: {err}")))?;
            if let Err(err) = self.swarm.dial(address) {
                warn!(address = %bootstrap, error = %err, "Falha ao discar bootstrap");
            }
        }

        info!("Nó P2P em execução");
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.on_swarm_event(event).await;
                }
                notification = self.notifications.recv() => {
                    match notification {
                        Ok(message) => self.on_core_message(message).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Observador da rede perdeu mensagens do núcleo");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Rede P2P encerrada");
                    return Ok(());
                }
            }
        }
    }

    async fn on_swarm_event(&mut self, event: SwarmEvent<UmbraBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "Escutando");
            }

            SwarmEvent::Behaviour(UmbraBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, address) in peers {
                    debug!(%peer_id, %address, "Par descoberto via mDNS");
                    self.swarm
                        .behaviour_mut()
                        .gossipsub
                        .add_explicit_peer(&peer_id);
                }
            }

            SwarmEvent::Behaviour(UmbraBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    self.swarm
                        .behaviour_mut()
                        .gossipsub
                        .remove_explicit_peer(&peer_id);
                    self.handler.peer_disconnected(&peer_id.to_string());
                }
            }

            SwarmEvent::Behaviour(UmbraBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                self.on_gossip_message(propagation_source, &message.data).await;
            }

            SwarmEvent::ConnectionClosed { peer_id, .. } => {
                debug!(%peer_id, "Conexão encerrada");
                self.handler.peer_disconnected(&peer_id.to_string());
            }

            _ => {}
        }
    }

    async fn on_gossip_message(&mut self, source: PeerId, data: &[u8]) {
        let message: ProtocolMessage = match serde_json::from_slice(data) {
            Ok(message) => message,
            Err(err) => {
                warn!(peer = %source, error = %err, "Mensagem indecifrável; derrubando o par");
                self.drop_peer(source);
                return;
            }
        };

        // Mensagens dirigidas a outro par não nos dizem respeito
        if let Some(to) = message.addressed_to() {
            if to != self.local_peer_id.to_string() {
                return;
            }
        }

        let actions = self
            .handler
            .handle_message(&source.to_string(), message)
            .await;

        for action in actions {
            match action {
                HandlerAction::Publish(message) => self.publish(&message),
                HandlerAction::DropPeer => self.drop_peer(source),
            }
        }
    }

    /// Fan-out das mensagens do núcleo para a rede
    async fn on_core_message(&mut self, message: BlockchainMessage) {
        match message {
            BlockchainMessage::NewBlock { block_index, .. } => {
                let raw_block = self.core.read().await.raw_block_by_index(block_index);
                if let Some(raw_block) = raw_block {
                    self.publish(&ProtocolMessage::NewBlock {
                        raw_block,
                        height: block_index,
                    });
                }
            }
            BlockchainMessage::AddTransaction { hashes } => {
                let core = self.core.read().await;
                let transactions: Vec<Vec<u8>> = hashes
                    .iter()
                    .filter_map(|hash| core.pool_transaction(hash))
                    .collect();
                drop(core);
                if !transactions.is_empty() {
                    self.publish(&ProtocolMessage::NewTransactions { transactions });
                }
            }
            // Alternativas, trocas de cadeia e remoções são assunto local
            _ => {}
        }
    }

    fn topic_for(&self, message: &ProtocolMessage) -> &gossipsub::IdentTopic {
        match message {
            ProtocolMessage::NewBlock { .. } | ProtocolMessage::NewLiteBlock { .. } => {
                &self.block_topic
            }
            ProtocolMessage::NewTransactions { .. } => &self.tx_topic,
            _ => &self.sync_topic,
        }
    }

    fn publish(&mut self, message: &ProtocolMessage) {
        let topic = self.topic_for(message).clone();
        match serde_json::to_vec(message) {
            Ok(data) => {
                if let Err(err) = self.swarm.behaviour_mut().gossipsub.publish(topic, data) {
                    debug!(error = %err, "Publicação adiada (sem pares?)");
                }
            }
            Err(err) => {
                warn!(error = %err, "Falha ao serializar mensagem de protocolo");
            }
        }
    }

    fn drop_peer(&mut self, peer_id: PeerId) {
        self.swarm
            .behaviour_mut()
            .gossipsub
            .blacklist_peer(&peer_id);
        let _ = self.swarm.disconnect_peer_id(peer_id);
        self.handler.peer_disconnected(&peer_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::checkpoints::Checkpoints;
    use umbra_core::core::RealTimeProvider;
    use umbra_core::currency::CurrencyBuilder;
    use umbra_core::storage::InMemoryMainChainStorage;

    async fn test_core() -> Arc<RwLock<Core>> {
        let core = Core::load(
            CurrencyBuilder::new().currency(),
            Checkpoints::new(),
            Box::new(InMemoryMainChainStorage::new()),
            None,
            Box::new(RealTimeProvider),
        )
        .unwrap();
        Arc::new(RwLock::new(core))
    }

    #[tokio::test]
    async fn test_request_chain_returns_supplement() {
        let core = test_core().await;
        let genesis = core.read().await.currency().genesis_hash();
        let mut handler = ProtocolHandler::new(core);

        let actions = handler
            .handle_message(
                "par-1",
                ProtocolMessage::RequestChain {
                    to: "eu".to_string(),
                    known_hashes: vec![genesis],
                },
            )
            .await;

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            HandlerAction::Publish(ProtocolMessage::ResponseChainEntry {
                to,
                start_index,
                total_count,
                hashes,
            }) => {
                assert_eq!(to, "par-1");
                assert_eq!(*start_index, 0);
                assert_eq!(*total_count, 1);
                assert_eq!(hashes.len(), 1);
            }
            other => panic!("Ação inesperada: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_chain_from_foreign_network_drops_peer() {
        let core = test_core().await;
        let mut handler = ProtocolHandler::new(core);

        let actions = handler
            .handle_message(
                "par-1",
                ProtocolMessage::RequestChain {
                    to: "eu".to_string(),
                    known_hashes: vec![Hash256::keccak256(b"outra rede")],
                },
            )
            .await;

        assert!(matches!(actions[0], HandlerAction::DropPeer));
    }

    #[tokio::test]
    async fn test_observed_height_tracks_peers() {
        let core = test_core().await;
        let mut handler = ProtocolHandler::new(core);
        let observed = handler.observed_height();

        handler
            .handle_message(
                "par-1",
                ProtocolMessage::ResponseChainEntry {
                    to: "eu".to_string(),
                    start_index: 0,
                    total_count: 42,
                    hashes: vec![],
                },
            )
            .await;
        assert_eq!(*observed.borrow(), 41);

        handler.peer_disconnected("par-1");
        assert_eq!(*observed.borrow(), 0);
    }

    #[tokio::test]
    async fn test_unsolicited_objects_response_drops_peer() {
        let core = test_core().await;
        let mut handler = ProtocolHandler::new(core);

        let actions = handler
            .handle_message(
                "par-1",
                ProtocolMessage::ResponseGetObjects {
                    to: "eu".to_string(),
                    blocks: vec![RawBlock::default()],
                    missed: vec![],
                    current_height: 0,
                },
            )
            .await;

        assert!(matches!(actions[0], HandlerAction::DropPeer));
    }
}
