//! Codec binário canônico do consenso
//!
//! O formato é o alvo direto do hashing, então precisa ser bit-exato: inteiros
//! em varint little-endian (7 bits por byte, bit alto como continuação),
//! estruturas como concatenação dos campos na ordem declarada. O serde cobre
//! as fronteiras de armazenamento e rede; este módulo cobre apenas o que o
//! consenso hasheia.

use shared::{Hash256, KeyImage, NodeError, PublicKey, Result, Signature};

/// Número máximo de bytes de um varint de 64 bits
const MAX_VARINT_LEN: usize = 10;

/// Escreve um inteiro em varint no buffer
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Tamanho em bytes da codificação varint de um valor
#[must_use]
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    value >>= 7;
    while value != 0 {
        len += 1;
        value >>= 7;
    }
    len
}

/// Leitor posicional sobre um buffer binário
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes ainda não consumidos
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Lê um varint de até 64 bits
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer terminar no meio do varint ou se a
    /// codificação exceder 64 bits
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;

        for _ in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let part = u64::from(byte & 0x7f);

            if shift == 63 && part > 1 {
                return Err(NodeError::SerializationError(
                    "Varint excede 64 bits".to_string(),
                ));
            }

            value |= part << shift;

            if byte & 0x80 == 0 {
                return Ok(value);
            }

            shift += 7;
        }

        Err(NodeError::SerializationError(
            "Varint longo demais".to_string(),
        ))
    }

    /// Lê um único byte
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer estiver esgotado
    pub fn read_u8(&mut self) -> Result<u8> {
        if self.position >= self.data.len() {
            return Err(NodeError::SerializationError(
                "Fim inesperado do buffer".to_string(),
            ));
        }
        let byte = self.data[self.position];
        self.position += 1;
        Ok(byte)
    }

    /// Lê `count` bytes crus
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer não tiver bytes suficientes
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(NodeError::SerializationError(
                "Fim inesperado do buffer".to_string(),
            ));
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    /// Lê um inteiro de 32 bits little-endian de largura fixa
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer não tiver bytes suficientes
    pub fn read_u32_le(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.read_bytes(4)?.try_into().map_err(|_| {
            NodeError::SerializationError("Fim inesperado do buffer".to_string())
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_array(&mut self) -> Result<[u8; 32]> {
        let bytes: [u8; 32] = self.read_bytes(32)?.try_into().map_err(|_| {
            NodeError::SerializationError("Fim inesperado do buffer".to_string())
        })?;
        Ok(bytes)
    }

    /// Lê um hash de 32 bytes
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer não tiver bytes suficientes
    pub fn read_hash(&mut self) -> Result<Hash256> {
        Ok(Hash256::from_bytes(self.read_array()?))
    }

    /// Lê uma chave pública de 32 bytes
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer não tiver bytes suficientes
    pub fn read_public_key(&mut self) -> Result<PublicKey> {
        Ok(PublicKey(self.read_array()?))
    }

    /// Lê uma imagem de chave de 32 bytes
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer não tiver bytes suficientes
    pub fn read_key_image(&mut self) -> Result<KeyImage> {
        Ok(KeyImage(self.read_array()?))
    }

    /// Lê um termo `(c, r)` de assinatura em anel
    ///
    /// # Errors
    ///
    /// Retorna erro se o buffer não tiver bytes suficientes
    pub fn read_signature(&mut self) -> Result<Signature> {
        Ok(Signature {
            c: self.read_array()?,
            r: self.read_array()?,
        })
    }
}

/// Tipos com forma binária canônica de consenso
pub trait ConsensusEncode {
    /// Anexa a forma binária ao buffer
    fn consensus_encode(&self, out: &mut Vec<u8>);

    /// Forma binária completa
    fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.consensus_encode(&mut out);
        out
    }

    /// Tamanho serializado em bytes
    fn binary_size(&self) -> u64 {
        self.to_binary().len() as u64
    }
}

/// Tipos reconstruíveis a partir da forma binária canônica
pub trait ConsensusDecode: Sized {
    /// Lê uma instância a partir do leitor
    ///
    /// # Errors
    ///
    /// Retorna erro em buffer malformado ou truncado
    fn consensus_decode(reader: &mut BinaryReader<'_>) -> Result<Self>;

    /// Desserializa o buffer inteiro, rejeitando bytes excedentes
    ///
    /// # Errors
    ///
    /// Retorna erro em buffer malformado, truncado ou com sobras
    fn from_binary(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        let value = Self::consensus_decode(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(NodeError::SerializationError(
                "Bytes excedentes após a estrutura".to_string(),
            ));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) -> u64 {
        let mut buf = Vec::new();
        write_varint(&mut buf, value);
        assert_eq!(buf.len(), varint_len(value));
        BinaryReader::new(&buf).read_varint().unwrap()
    }

    #[test]
    fn test_varint_round_trip() {
        for value in [0, 1, 127, 128, 300, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            assert_eq!(round_trip(value), value);
        }
    }

    #[test]
    fn test_varint_boundaries() {
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(128), 2);
        assert_eq!(varint_len(u64::MAX), 10);
    }

    #[test]
    fn test_truncated_varint_fails() {
        let buf = vec![0x80];
        assert!(BinaryReader::new(&buf).read_varint().is_err());
    }

    #[test]
    fn test_reader_rejects_short_buffer() {
        let buf = [0u8; 16];
        let mut reader = BinaryReader::new(&buf);
        assert!(reader.read_hash().is_err());
    }
}
