//! Primitivas de curva Ed25519 para o consenso Umbra
//!
//! Implementa os contratos criptográficos consumidos pelo núcleo: validade de
//! chave, pertinência da imagem de chave ao subgrupo de ordem prima e
//! assinaturas em anel no esquema clássico (um par `(c, r)` por membro do
//! anel, fechado por hash-para-escalar sobre o hash de prefixo).
//!
//! A derivação ponto-de-hash usada aqui é `Hp(P) = hash_to_scalar(P) · G`,
//! mantendo geração e verificação mutuamente consistentes.

use crate::hash::Hash256;
use crate::{NodeError, Result};
use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Chave pública: ponto Edwards comprimido
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

/// Chave secreta: escalar do subgrupo de ordem prima
#[derive(Clone, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
pub struct SecretKey(pub [u8; 32]);

/// Imagem de chave: marca pública e única de gasto de uma saída
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyImage(pub [u8; 32]);

/// Um termo `(c, r)` de uma assinatura em anel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub c: [u8; 32],
    pub r: [u8; 32],
}

/// Assinatura em anel completa de uma entrada: um termo por membro do anel
pub type RingSignature = Vec<Signature>;

/// Par de chaves de gasto
#[derive(Clone)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}

impl KeyPair {
    /// Gera um novo par de chaves aleatório
    #[must_use]
    pub fn generate() -> Self {
        let secret = Scalar::random(&mut OsRng);
        let public = EdwardsPoint::mul_base(&secret).compress();
        Self {
            public_key: PublicKey(public.to_bytes()),
            secret_key: SecretKey(secret.to_bytes()),
        }
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Nunca expor o escalar em logs
        write!(f, "SecretKey(..)")
    }
}

/// Verifica se a chave pública é um ponto válido da curva
#[must_use]
pub fn check_key(key: &PublicKey) -> bool {
    CompressedEdwardsY(key.0).decompress().is_some()
}

/// Verifica se a imagem de chave pertence ao subgrupo de ordem prima
///
/// Equivalente ao teste `ki · L == I`, onde `L` é a ordem do subgrupo e `I`
/// a identidade do grupo. Imagens fora do subgrupo permitiriam gasto duplo
/// por adição de componentes de torção.
#[must_use]
pub fn key_image_in_prime_subgroup(key_image: &KeyImage) -> bool {
    match CompressedEdwardsY(key_image.0).decompress() {
        Some(point) => point.is_torsion_free(),
        None => false,
    }
}

/// Reduz um hash Keccak-256 a um escalar do subgrupo
#[must_use]
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    Scalar::from_bytes_mod_order(*Hash256::keccak256(data).as_bytes())
}

/// Deriva o ponto de hash `Hp(P)` de uma chave pública
fn hash_to_point(key: &PublicKey) -> EdwardsPoint {
    EdwardsPoint::mul_base(&hash_to_scalar(&key.0))
}

fn decode_scalar(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

fn decode_point(bytes: &[u8; 32]) -> Option<EdwardsPoint> {
    CompressedEdwardsY(*bytes).decompress()
}

/// Gera a imagem de chave `x · Hp(P)` de um par de chaves
///
/// # Errors
///
/// Retorna erro se a chave secreta não for um escalar canônico
pub fn generate_key_image(keys: &KeyPair) -> Result<KeyImage> {
    let secret = decode_scalar(&keys.secret_key.0).ok_or(NodeError::InvalidKey)?;
    let point = secret * hash_to_point(&keys.public_key);
    Ok(KeyImage(point.compress().to_bytes()))
}

/// Gera uma assinatura em anel sobre `prefix_hash`
///
/// O anel `ring` contém a chave real em `real_index`; os demais membros são
/// iscas. A assinatura prova posse de uma chave do anel sem revelar qual, e
/// amarra o gasto à imagem de chave fornecida.
///
/// # Errors
///
/// Retorna erro se o índice real estiver fora do anel, se alguma chave do
/// anel for inválida ou se a chave secreta não corresponder à posição real
pub fn generate_ring_signature(
    prefix_hash: &Hash256,
    key_image: &KeyImage,
    ring: &[PublicKey],
    secret_key: &SecretKey,
    real_index: usize,
) -> Result<RingSignature> {
    if real_index >= ring.len() {
        return Err(NodeError::CryptographicError(
            "Índice real fora do anel".to_string(),
        ));
    }

    let secret = decode_scalar(&secret_key.0).ok_or(NodeError::InvalidKey)?;
    let image = decode_point(&key_image.0).ok_or(NodeError::InvalidKey)?;

    let mut signatures = vec![Signature::default(); ring.len()];
    let mut challenge_sum = Scalar::ZERO;
    let mut transcript = Vec::with_capacity(32 + ring.len() * 64);
    transcript.extend_from_slice(prefix_hash.as_bytes());

    let nonce = Scalar::random(&mut OsRng);

    for (i, member) in ring.iter().enumerate() {
        let point = decode_point(&member.0).ok_or(NodeError::InvalidKey)?;
        let (l, r) = if i == real_index {
            // Termo real: compromissos a partir do nonce efêmero
            (
                EdwardsPoint::mul_base(&nonce),
                nonce * hash_to_point(member),
            )
        } else {
            let c = Scalar::random(&mut OsRng);
            let r = Scalar::random(&mut OsRng);
            signatures[i] = Signature {
                c: c.to_bytes(),
                r: r.to_bytes(),
            };
            challenge_sum += c;
            (
                EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &point, &r),
                r * hash_to_point(member) + c * image,
            )
        };

        transcript.extend_from_slice(&l.compress().to_bytes());
        transcript.extend_from_slice(&r.compress().to_bytes());
    }

    let challenge = hash_to_scalar(&transcript);
    let real_c = challenge - challenge_sum;
    let real_r = nonce - real_c * secret;
    signatures[real_index] = Signature {
        c: real_c.to_bytes(),
        r: real_r.to_bytes(),
    };

    Ok(signatures)
}

/// Verifica uma assinatura em anel sobre `prefix_hash`
///
/// Reconstrói os compromissos `L_i = c_i·P_i + r_i·G` e
/// `R_i = r_i·Hp(P_i) + c_i·I` e exige que o hash do transcript seja igual à
/// soma dos desafios. Qualquer escalar ou ponto malformado invalida a
/// assinatura.
#[must_use]
pub fn check_ring_signature(
    prefix_hash: &Hash256,
    key_image: &KeyImage,
    ring: &[PublicKey],
    signatures: &[Signature],
) -> bool {
    if ring.is_empty() || ring.len() != signatures.len() {
        return false;
    }

    let Some(image) = decode_point(&key_image.0) else {
        return false;
    };

    let mut challenge_sum = Scalar::ZERO;
    let mut transcript = Vec::with_capacity(32 + ring.len() * 64);
    transcript.extend_from_slice(prefix_hash.as_bytes());

    for (member, signature) in ring.iter().zip(signatures) {
        let Some(point) = decode_point(&member.0) else {
            return false;
        };
        let (Some(c), Some(r)) = (decode_scalar(&signature.c), decode_scalar(&signature.r))
        else {
            return false;
        };

        let l = EdwardsPoint::vartime_double_scalar_mul_basepoint(&c, &point, &r);
        let rr = r * hash_to_point(member) + c * image;

        transcript.extend_from_slice(&l.compress().to_bytes());
        transcript.extend_from_slice(&rr.compress().to_bytes());
        challenge_sum += c;
    }

    hash_to_scalar(&transcript) == challenge_sum
}

/// Deriva uma chave pública determinística a partir de uma semente
///
/// Usada para chaves fixas de consenso, como as saídas do bloco gênese.
#[must_use]
pub fn deterministic_public_key(seed: &[u8]) -> PublicKey {
    PublicKey(EdwardsPoint::mul_base(&hash_to_scalar(seed)).compress().to_bytes())
}

/// Deriva a chave única de uma saída endereçada a `spend_key`
///
/// `P_out = P_spend + Hs(R ‖ índice) · G`, onde `R` é a chave pública da
/// transação. O destinatário reconstrói a mesma chave a partir do extra.
///
/// # Errors
///
/// Retorna erro se a chave de destino não for um ponto válido da curva
pub fn derive_output_key(
    tx_public_key: &PublicKey,
    output_index: u64,
    spend_key: &PublicKey,
) -> Result<PublicKey> {
    let spend_point = decode_point(&spend_key.0).ok_or(NodeError::InvalidKey)?;

    let mut seed = Vec::with_capacity(40);
    seed.extend_from_slice(&tx_public_key.0);
    seed.extend_from_slice(&output_index.to_le_bytes());

    let derived = spend_point + EdwardsPoint::mul_base(&hash_to_scalar(&seed));
    Ok(PublicKey(derived.compress().to_bytes()))
}

/// Deriva a chave secreta de uma saída endereçada ao par `spend_keys`
///
/// Contraparte de [`derive_output_key`]: `x_out = x_spend + Hs(R ‖ índice)`.
///
/// # Errors
///
/// Retorna erro se a chave secreta de gasto não for um escalar canônico
pub fn derive_output_secret_key(
    tx_public_key: &PublicKey,
    output_index: u64,
    spend_keys: &KeyPair,
) -> Result<SecretKey> {
    let spend_secret = decode_scalar(&spend_keys.secret_key.0).ok_or(NodeError::InvalidKey)?;

    let mut seed = Vec::with_capacity(40);
    seed.extend_from_slice(&tx_public_key.0);
    seed.extend_from_slice(&output_index.to_le_bytes());

    let derived = spend_secret + hash_to_scalar(&seed);
    Ok(SecretKey(derived.to_bytes()))
}

/// Ponto identidade comprimido, útil em testes de domínio
#[must_use]
pub fn identity_point_bytes() -> [u8; 32] {
    EdwardsPoint::identity().compress().to_bytes()
}

/// Um ponto fora do subgrupo de ordem prima (tem componente de torção)
///
/// Usado em testes para exercitar a rejeição de imagens de chave inválidas.
#[must_use]
pub fn torsioned_point_bytes() -> [u8; 32] {
    // Soma de um ponto do subgrupo com um ponto de 8-torção
    let eight_torsion = curve25519_dalek::constants::EIGHT_TORSION[1];
    (ED25519_BASEPOINT_POINT + eight_torsion).compress().to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keys = KeyPair::generate();
        assert!(check_key(&keys.public_key));
    }

    #[test]
    fn test_key_image_in_subgroup() {
        let keys = KeyPair::generate();
        let image = generate_key_image(&keys).unwrap();
        assert!(key_image_in_prime_subgroup(&image));
    }

    #[test]
    fn test_torsioned_key_image_rejected() {
        let image = KeyImage(torsioned_point_bytes());
        assert!(!key_image_in_prime_subgroup(&image));
    }

    #[test]
    fn test_ring_signature_round_trip() {
        let prefix = Hash256::keccak256(b"prefixo de transacao");
        let real = KeyPair::generate();
        let decoy1 = KeyPair::generate();
        let decoy2 = KeyPair::generate();

        let ring = vec![decoy1.public_key, real.public_key, decoy2.public_key];
        let image = generate_key_image(&real).unwrap();

        let signature =
            generate_ring_signature(&prefix, &image, &ring, &real.secret_key, 1).unwrap();

        assert!(check_ring_signature(&prefix, &image, &ring, &signature));
    }

    #[test]
    fn test_ring_signature_wrong_prefix_fails() {
        let prefix = Hash256::keccak256(b"prefixo");
        let real = KeyPair::generate();
        let ring = vec![real.public_key];
        let image = generate_key_image(&real).unwrap();

        let signature =
            generate_ring_signature(&prefix, &image, &ring, &real.secret_key, 0).unwrap();

        let other = Hash256::keccak256(b"outro prefixo");
        assert!(!check_ring_signature(&other, &image, &ring, &signature));
    }

    #[test]
    fn test_ring_signature_wrong_image_fails() {
        let prefix = Hash256::keccak256(b"prefixo");
        let real = KeyPair::generate();
        let other = KeyPair::generate();
        let ring = vec![real.public_key];
        let image = generate_key_image(&real).unwrap();
        let wrong_image = generate_key_image(&other).unwrap();

        let signature =
            generate_ring_signature(&prefix, &image, &ring, &real.secret_key, 0).unwrap();

        assert!(!check_ring_signature(&prefix, &wrong_image, &ring, &signature));
    }

    #[test]
    fn test_output_key_derivation_consistency() {
        let wallet = KeyPair::generate();
        let tx_keys = KeyPair::generate();

        let public = derive_output_key(&tx_keys.public_key, 3, &wallet.public_key).unwrap();
        let secret = derive_output_secret_key(&tx_keys.public_key, 3, &wallet).unwrap();

        let scalar = decode_scalar(&secret.0).unwrap();
        let expected = EdwardsPoint::mul_base(&scalar).compress().to_bytes();
        assert_eq!(public.0, expected);
    }

    #[test]
    fn test_ring_size_mismatch_fails() {
        let prefix = Hash256::keccak256(b"prefixo");
        let real = KeyPair::generate();
        let ring = vec![real.public_key];
        let image = generate_key_image(&real).unwrap();

        let signature =
            generate_ring_signature(&prefix, &image, &ring, &real.secret_key, 0).unwrap();

        assert!(!check_ring_signature(&prefix, &image, &ring, &[]));
        let bigger = vec![real.public_key, real.public_key];
        assert!(!check_ring_signature(&prefix, &image, &bigger, &signature));
    }
}
