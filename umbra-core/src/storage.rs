//! Adaptadores de armazenamento do núcleo
//!
//! Dois artefatos persistem: o vetor append-only de blocos crus (arquivo de
//! dados + arquivo de índices, com cache de leitura limitado) e o snapshot do
//! cache indexado, com célula de versão de esquema. Uma versão incompatível
//! destrói o snapshot; o núcleo reimporta do vetor de blocos na carga.

use crate::block::RawBlock;
use crate::segment::BlockchainCache;
use shared::{NodeError, Result};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Capacidade do cache de leitura do vetor de blocos
const STORAGE_CACHE_SIZE: usize = 100;

/// Versão do esquema do snapshot indexado
const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Vetor append-only de blocos crus endereçável por índice
pub trait MainChainStorage: Send + Sync {
    /// Anexa um bloco ao topo
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de escrita
    fn push_block(&mut self, raw_block: RawBlock) -> Result<()>;

    /// Remove o bloco do topo
    ///
    /// # Errors
    ///
    /// Retorna erro se o vetor estiver vazio ou em falha de escrita
    fn pop_block(&mut self) -> Result<()>;

    /// Bloco pelo índice
    ///
    /// # Errors
    ///
    /// Retorna erro se o índice estiver fora do vetor ou em falha de leitura
    fn block_by_index(&mut self, index: u32) -> Result<RawBlock>;

    /// Número de blocos armazenados
    fn block_count(&self) -> u32;

    /// Descarta todos os blocos
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de escrita
    fn clear(&mut self) -> Result<()>;
}

/// Vetor de blocos em memória, para testes e nós efêmeros
#[derive(Debug, Default)]
pub struct InMemoryMainChainStorage {
    blocks: Vec<RawBlock>,
}

impl InMemoryMainChainStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MainChainStorage for InMemoryMainChainStorage {
    fn push_block(&mut self, raw_block: RawBlock) -> Result<()> {
        self.blocks.push(raw_block);
        Ok(())
    }

    fn pop_block(&mut self) -> Result<()> {
        self.blocks
            .pop()
            .map(|_| ())
            .ok_or_else(|| NodeError::StorageError("Vetor de blocos vazio".to_string()))
    }

    fn block_by_index(&mut self, index: u32) -> Result<RawBlock> {
        self.blocks
            .get(index as usize)
            .cloned()
            .ok_or_else(|| {
                NodeError::StorageError(format!("Índice de bloco fora do vetor: {index}"))
            })
    }

    fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn clear(&mut self) -> Result<()> {
        self.blocks.clear();
        Ok(())
    }
}

/// Vetor de blocos em disco: arquivo de dados + arquivo de índices
///
/// Cada registro no arquivo de dados é `comprimento (u64 LE)` seguido do
/// bloco em bincode; o arquivo de índices guarda o deslocamento de cada
/// registro. Leituras recentes ficam num cache limitado com descarte do mais
/// antigo.
pub struct SwappedMainChainStorage {
    data_path: PathBuf,
    index_path: PathBuf,
    offsets: Vec<u64>,
    cache: HashMap<u32, RawBlock>,
    cache_order: VecDeque<u32>,
}

impl SwappedMainChainStorage {
    /// Abre (ou cria) o vetor de blocos nos caminhos dados
    ///
    /// # Errors
    ///
    /// Retorna erro se os arquivos não puderem ser abertos ou se o índice
    /// estiver corrompido
    pub fn open(data_path: PathBuf, index_path: PathBuf) -> Result<Self> {
        if let Some(parent) = data_path.parent() {
            fs::create_dir_all(parent)?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&data_path)?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)?;

        let mut index_file = File::open(&index_path)?;
        let mut index_bytes = Vec::new();
        index_file.read_to_end(&mut index_bytes)?;

        if index_bytes.len() % 8 != 0 {
            return Err(NodeError::StorageError(
                "Arquivo de índices de blocos corrompido".to_string(),
            ));
        }

        let offsets = index_bytes
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap_or_default()))
            .collect();

        debug!(path = %data_path.display(), "Vetor de blocos aberto");

        Ok(Self {
            data_path,
            index_path,
            offsets,
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
        })
    }

    fn cache_insert(&mut self, index: u32, block: RawBlock) {
        if self.cache_order.len() >= STORAGE_CACHE_SIZE {
            if let Some(evicted) = self.cache_order.pop_front() {
                self.cache.remove(&evicted);
            }
        }
        self.cache_order.push_back(index);
        self.cache.insert(index, block);
    }
}

impl MainChainStorage for SwappedMainChainStorage {
    fn push_block(&mut self, raw_block: RawBlock) -> Result<()> {
        let encoded = bincode::serialize(&raw_block)
            .map_err(|err| NodeError::SerializationError(err.to_string()))?;

        let mut data_file = OpenOptions::new().append(true).open(&self.data_path)?;
        let offset = data_file.seek(SeekFrom::End(0))?;
        data_file.write_all(&(encoded.len() as u64).to_le_bytes())?;
        data_file.write_all(&encoded)?;

        let mut index_file = OpenOptions::new().append(true).open(&self.index_path)?;
        index_file.write_all(&offset.to_le_bytes())?;

        let index = self.offsets.len() as u32;
        self.offsets.push(offset);
        self.cache_insert(index, raw_block);
        Ok(())
    }

    fn pop_block(&mut self) -> Result<()> {
        let offset = self.offsets.pop().ok_or_else(|| {
            NodeError::StorageError("Vetor de blocos vazio".to_string())
        })?;

        let data_file = OpenOptions::new().write(true).open(&self.data_path)?;
        data_file.set_len(offset)?;

        let index_file = OpenOptions::new().write(true).open(&self.index_path)?;
        index_file.set_len(self.offsets.len() as u64 * 8)?;

        let index = self.offsets.len() as u32;
        self.cache.remove(&index);
        self.cache_order.retain(|cached| *cached != index);
        Ok(())
    }

    fn block_by_index(&mut self, index: u32) -> Result<RawBlock> {
        if let Some(block) = self.cache.get(&index) {
            return Ok(block.clone());
        }

        let offset = *self.offsets.get(index as usize).ok_or_else(|| {
            NodeError::StorageError(format!("Índice de bloco fora do vetor: {index}"))
        })?;

        let mut data_file = File::open(&self.data_path)?;
        data_file.seek(SeekFrom::Start(offset))?;

        let mut length_bytes = [0u8; 8];
        data_file.read_exact(&mut length_bytes)?;
        let length = u64::from_le_bytes(length_bytes) as usize;

        let mut encoded = vec![0u8; length];
        data_file.read_exact(&mut encoded)?;

        let block: RawBlock = bincode::deserialize(&encoded)
            .map_err(|err| NodeError::SerializationError(err.to_string()))?;

        self.cache_insert(index, block.clone());
        Ok(block)
    }

    fn block_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    fn clear(&mut self) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .open(&self.data_path)?
            .set_len(0)?;
        OpenOptions::new()
            .write(true)
            .open(&self.index_path)?
            .set_len(0)?;
        self.offsets.clear();
        self.cache.clear();
        self.cache_order.clear();
        Ok(())
    }
}

/// Snapshot do cache indexado com célula de versão de esquema
///
/// Escritas são atômicas: o snapshot vai para um arquivo temporário e é
/// renomeado por cima do anterior. Uma versão de esquema incompatível na
/// abertura destrói o snapshot; o chamador reimporta do vetor de blocos.
pub struct SnapshotStore {
    directory: PathBuf,
}

impl SnapshotStore {
    /// Abre (ou cria) o diretório de snapshot, validando a versão
    ///
    /// # Errors
    ///
    /// Retorna erro se o diretório não puder ser criado ou escrito
    pub fn open(directory: PathBuf) -> Result<Self> {
        fs::create_dir_all(&directory)?;
        let store = Self { directory };

        match store.read_version()? {
            Some(version) if version == SNAPSHOT_SCHEMA_VERSION => {}
            Some(version) => {
                warn!(
                    found = version,
                    expected = SNAPSHOT_SCHEMA_VERSION,
                    "Versão de esquema incompatível; destruindo snapshot"
                );
                store.destroy()?;
                store.write_version()?;
            }
            None => store.write_version()?,
        }

        Ok(store)
    }

    fn version_path(&self) -> PathBuf {
        self.directory.join("version")
    }

    fn snapshot_path(&self) -> PathBuf {
        self.directory.join("segment.bin")
    }

    fn read_version(&self) -> Result<Option<u32>> {
        match fs::read(self.version_path()) {
            Ok(bytes) if bytes.len() == 4 => Ok(Some(u32::from_le_bytes(
                bytes.try_into().unwrap_or_default(),
            ))),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_version(&self) -> Result<()> {
        fs::write(self.version_path(), SNAPSHOT_SCHEMA_VERSION.to_le_bytes())?;
        Ok(())
    }

    /// Remove o snapshot persistido
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de remoção
    pub fn destroy(&self) -> Result<()> {
        match fs::remove_file(self.snapshot_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Carrega o segmento raiz persistido, se houver
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de leitura; um snapshot indecifrável é tratado
    /// como ausente (será reimportado do vetor de blocos)
    pub fn load(&self) -> Result<Option<BlockchainCache>> {
        let bytes = match fs::read(self.snapshot_path()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match bincode::deserialize(&bytes) {
            Ok(cache) => Ok(Some(cache)),
            Err(err) => {
                warn!(error = %err, "Snapshot indecifrável; será reimportado");
                Ok(None)
            }
        }
    }

    /// Persiste o segmento raiz atomicamente
    ///
    /// # Errors
    ///
    /// Retorna erro em falha de serialização ou escrita
    pub fn save(&self, cache: &BlockchainCache) -> Result<()> {
        let encoded = bincode::serialize(cache)
            .map_err(|err| NodeError::SerializationError(err.to_string()))?;

        let temp_path = self.directory.join("segment.bin.tmp");
        fs::write(&temp_path, &encoded)?;
        fs::rename(&temp_path, self.snapshot_path())?;

        info!(
            bytes = encoded.len(),
            blocks = cache.block_count(),
            "Snapshot do segmento raiz persistido"
        );
        Ok(())
    }
}

/// Abre o vetor de blocos de um diretório de dados
///
/// # Errors
///
/// Retorna erro se os arquivos não puderem ser abertos
pub fn create_swapped_main_chain_storage(data_dir: &Path) -> Result<SwappedMainChainStorage> {
    SwappedMainChainStorage::open(
        data_dir.join("blocks.bin"),
        data_dir.join("blockindexes.bin"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "umbra-storage-{tag}-{}",
            std::process::id()
        ));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample_block(seed: u8) -> RawBlock {
        RawBlock {
            block: vec![seed; 64],
            transactions: vec![vec![seed, seed]],
        }
    }

    #[test]
    fn test_in_memory_push_pop() {
        let mut storage = InMemoryMainChainStorage::new();
        storage.push_block(sample_block(1)).unwrap();
        storage.push_block(sample_block(2)).unwrap();

        assert_eq!(storage.block_count(), 2);
        assert_eq!(storage.block_by_index(1).unwrap(), sample_block(2));

        storage.pop_block().unwrap();
        assert_eq!(storage.block_count(), 1);
        assert!(storage.block_by_index(1).is_err());
    }

    #[test]
    fn test_swapped_storage_round_trip() {
        let dir = temp_dir("roundtrip");
        {
            let mut storage = create_swapped_main_chain_storage(&dir).unwrap();
            for seed in 0..5u8 {
                storage.push_block(sample_block(seed)).unwrap();
            }
            storage.pop_block().unwrap();
        }

        // Reabre e confere persistência
        let mut storage = create_swapped_main_chain_storage(&dir).unwrap();
        assert_eq!(storage.block_count(), 4);
        assert_eq!(storage.block_by_index(3).unwrap(), sample_block(3));
        assert!(storage.block_by_index(4).is_err());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_swapped_storage_push_after_reopen() {
        let dir = temp_dir("reopen");
        {
            let mut storage = create_swapped_main_chain_storage(&dir).unwrap();
            storage.push_block(sample_block(1)).unwrap();
        }
        {
            let mut storage = create_swapped_main_chain_storage(&dir).unwrap();
            storage.push_block(sample_block(2)).unwrap();
            assert_eq!(storage.block_by_index(0).unwrap(), sample_block(1));
            assert_eq!(storage.block_by_index(1).unwrap(), sample_block(2));
        }

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_snapshot_store_round_trip() {
        let dir = temp_dir("snapshot");
        let store = SnapshotStore::open(dir.clone()).unwrap();
        assert!(store.load().unwrap().is_none());

        let cache = BlockchainCache::new(0);
        store.save(&cache).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.block_count(), 0);
        assert_eq!(loaded.start_block_index(), 0);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_snapshot_version_mismatch_destroys() {
        let dir = temp_dir("version");
        {
            let store = SnapshotStore::open(dir.clone()).unwrap();
            store.save(&BlockchainCache::new(0)).unwrap();
        }

        // Versão incompatível gravada por fora
        fs::write(dir.join("version"), 999u32.to_le_bytes()).unwrap();

        let store = SnapshotStore::open(dir.clone()).unwrap();
        assert!(store.load().unwrap().is_none());

        fs::remove_dir_all(&dir).ok();
    }
}
