//! Transaction types and serialization.

use xid_consensus::{EligibleIndex, Hash256};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::fast_hash;

pub type PublicKey = [u8; 32];
pub type KeyImage = [u8; 32];
pub type Signature = [u8; 64];

pub const SIGNATURE_SIZE: usize = 64;

pub const INPUT_TAG_BASE: u8 = 0x01;
pub const INPUT_TAG_KEY: u8 = 0x02;
pub const OUTPUT_TAG_KEY: u8 = 0x01;
pub const SIGNATURES_TAG_FULL: u8 = 0x01;
pub const SIGNATURES_TAG_PRUNED: u8 = 0x02;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BaseInput {
    /// Index of the block this base transaction belongs to.
    pub height: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyInput {
    pub amount: u64,
    /// Relative (delta) offsets, exactly as serialized.
    pub output_indices: Vec<u32>,
    pub key_image: KeyImage,
}

impl KeyInput {
    /// Builds an input from absolute global indices, which must be ascending.
    pub fn from_absolute(amount: u64, absolute: &[u32], key_image: KeyImage) -> Self {
        Self {
            amount,
            output_indices: relative_output_indices(absolute),
            key_image,
        }
    }

    pub fn absolute_output_indices(&self) -> Vec<u32> {
        absolute_output_indices(&self.output_indices)
    }

    pub fn ring_size(&self) -> usize {
        self.output_indices.len()
    }
}

pub fn absolute_output_indices(relative: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(relative.len());
    let mut acc = 0u32;
    for offset in relative {
        acc = acc.wrapping_add(*offset);
        out.push(acc);
    }
    out
}

pub fn relative_output_indices(absolute: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(absolute.len());
    let mut previous = 0u32;
    for index in absolute {
        out.push(index.wrapping_sub(previous));
        previous = *index;
    }
    out
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransactionInput {
    Base(BaseInput),
    Key(KeyInput),
}

impl TransactionInput {
    pub fn tag(&self) -> u8 {
        match self {
            TransactionInput::Base(_) => INPUT_TAG_BASE,
            TransactionInput::Key(_) => INPUT_TAG_KEY,
        }
    }

    /// Signatures this input carries in a full collection.
    pub fn signature_count(&self) -> usize {
        match self {
            TransactionInput::Base(_) => 0,
            TransactionInput::Key(input) => input.ring_size(),
        }
    }
}

impl Encodable for TransactionInput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.tag());
        match self {
            TransactionInput::Base(input) => encoder.write_varint(u64::from(input.height)),
            TransactionInput::Key(input) => {
                encoder.write_varint(input.amount);
                encoder.write_varint(input.output_indices.len() as u64);
                for offset in &input.output_indices {
                    encoder.write_varint(u64::from(*offset));
                }
                encoder.write_hash(&input.key_image);
            }
        }
    }
}

impl Decodable for TransactionInput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        match decoder.read_u8()? {
            INPUT_TAG_BASE => Ok(TransactionInput::Base(BaseInput {
                height: decoder.read_varint_u32()?,
            })),
            INPUT_TAG_KEY => {
                let amount = decoder.read_varint()?;
                let count = decoder.read_count()?;
                let mut output_indices = Vec::with_capacity(count.min(decoder.remaining()));
                for _ in 0..count {
                    output_indices.push(decoder.read_varint_u32()?);
                }
                let key_image = decoder.read_hash()?;
                Ok(TransactionInput::Key(KeyInput {
                    amount,
                    output_indices,
                    key_image,
                }))
            }
            _ => Err(DecodeError::InvalidData("unknown transaction input tag")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeyOutput {
    pub public_key: PublicKey,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputTarget {
    Key(KeyOutput),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransactionOutput {
    pub amount: u64,
    pub target: OutputTarget,
}

impl TransactionOutput {
    pub fn to_key(amount: u64, public_key: PublicKey) -> Self {
        Self {
            amount,
            target: OutputTarget::Key(KeyOutput { public_key }),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        match &self.target {
            OutputTarget::Key(output) => &output.public_key,
        }
    }
}

impl Encodable for TransactionOutput {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_varint(self.amount);
        match &self.target {
            OutputTarget::Key(output) => {
                encoder.write_u8(OUTPUT_TAG_KEY);
                encoder.write_hash(&output.public_key);
            }
        }
    }
}

impl Decodable for TransactionOutput {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let amount = decoder.read_varint()?;
        match decoder.read_u8()? {
            OUTPUT_TAG_KEY => Ok(TransactionOutput::to_key(amount, decoder.read_hash()?)),
            _ => Err(DecodeError::InvalidData("unknown output target tag")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransactionPrefix {
    pub version: u8,
    pub unlock_time: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub extra: Vec<u8>,
}

impl Encodable for TransactionPrefix {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.version);
        encoder.write_varint(self.unlock_time);
        encoder.write_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.consensus_encode(encoder);
        }
        encoder.write_var_bytes(&self.extra);
    }
}

impl Decodable for TransactionPrefix {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u8()?;
        let unlock_time = decoder.read_varint()?;
        let input_count = decoder.read_count()?;
        let mut inputs = Vec::with_capacity(input_count.min(decoder.remaining()));
        for _ in 0..input_count {
            inputs.push(TransactionInput::consensus_decode(decoder)?);
        }
        let output_count = decoder.read_count()?;
        let mut outputs = Vec::with_capacity(output_count.min(decoder.remaining()));
        for _ in 0..output_count {
            outputs.push(TransactionOutput::consensus_decode(decoder)?);
        }
        let extra = decoder.read_var_bytes()?;
        Ok(Self {
            version,
            unlock_time,
            inputs,
            outputs,
            extra,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PrunedSignatures {
    /// `fast_hash` of the signature bytes that were dropped.
    pub hash: Hash256,
    pub size: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransactionSignatures {
    /// One ring per input; base inputs carry an empty ring.
    Full(Vec<Vec<Signature>>),
    Pruned(PrunedSignatures),
}

impl TransactionSignatures {
    pub fn is_pruned(&self) -> bool {
        matches!(self, TransactionSignatures::Pruned(_))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub prefix: TransactionPrefix,
    pub signatures: TransactionSignatures,
}

impl Transaction {
    pub fn hash(&self) -> Hash256 {
        fast_hash(&crate::encoding::encode(&self.prefix))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::encoding::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        crate::encoding::decode(bytes)
    }

    pub fn is_base(&self) -> bool {
        matches!(self.prefix.inputs.as_slice(), [TransactionInput::Base(_)])
    }

    pub fn base_height(&self) -> Option<u32> {
        match self.prefix.inputs.as_slice() {
            [TransactionInput::Base(input)] => Some(input.height),
            _ => None,
        }
    }

    pub fn key_inputs(&self) -> impl Iterator<Item = &KeyInput> {
        self.prefix.inputs.iter().filter_map(|input| match input {
            TransactionInput::Key(input) => Some(input),
            TransactionInput::Base(_) => None,
        })
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.key_inputs().map(|input| &input.key_image)
    }

    pub fn input_amount(&self) -> Option<u64> {
        self.key_inputs()
            .try_fold(0u64, |acc, input| acc.checked_add(input.amount))
    }

    pub fn output_amount(&self) -> Option<u64> {
        self.prefix
            .outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.amount))
    }

    /// Inputs minus outputs; `None` when outputs exceed inputs or a sum overflows.
    pub fn fee(&self) -> Option<u64> {
        if self.is_base() {
            return Some(0);
        }
        self.input_amount()?.checked_sub(self.output_amount()?)
    }

    pub fn unlock_index(&self) -> EligibleIndex {
        EligibleIndex::from_unlock_time(self.prefix.unlock_time)
    }

    /// Whether a full collection has one ring per input with matching ring
    /// sizes. Pruned collections are always consistent.
    pub fn signatures_consistent(&self) -> bool {
        match &self.signatures {
            TransactionSignatures::Pruned(_) => true,
            TransactionSignatures::Full(rings) => {
                rings.len() == self.prefix.inputs.len()
                    && rings
                        .iter()
                        .zip(&self.prefix.inputs)
                        .all(|(ring, input)| ring.len() == input.signature_count())
            }
        }
    }

    pub fn signature_bytes(&self) -> Option<Vec<u8>> {
        match &self.signatures {
            TransactionSignatures::Full(rings) => {
                let mut out = Vec::with_capacity(
                    rings.iter().map(Vec::len).sum::<usize>() * SIGNATURE_SIZE,
                );
                for ring in rings {
                    for signature in ring {
                        out.extend_from_slice(signature);
                    }
                }
                Some(out)
            }
            TransactionSignatures::Pruned(_) => None,
        }
    }

    /// Replaces full signatures by their hash and byte size. No-op when
    /// already pruned.
    pub fn prune(&mut self) {
        if let Some(bytes) = self.signature_bytes() {
            self.signatures = TransactionSignatures::Pruned(PrunedSignatures {
                hash: fast_hash(&bytes),
                size: bytes.len() as u64,
            });
        }
    }

    pub fn signatures_hash(&self) -> Hash256 {
        match &self.signatures {
            TransactionSignatures::Pruned(pruned) => pruned.hash,
            TransactionSignatures::Full(_) => {
                fast_hash(&self.signature_bytes().unwrap_or_default())
            }
        }
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prefix.consensus_encode(encoder);
        match &self.signatures {
            TransactionSignatures::Full(rings) => {
                encoder.write_u8(SIGNATURES_TAG_FULL);
                for ring in rings {
                    for signature in ring {
                        encoder.write_bytes(signature);
                    }
                }
            }
            TransactionSignatures::Pruned(pruned) => {
                encoder.write_u8(SIGNATURES_TAG_PRUNED);
                encoder.write_hash(&pruned.hash);
                encoder.write_varint(pruned.size);
            }
        }
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prefix = TransactionPrefix::consensus_decode(decoder)?;
        let signatures = match decoder.read_u8()? {
            SIGNATURES_TAG_FULL => {
                let mut rings = Vec::with_capacity(prefix.inputs.len());
                for input in &prefix.inputs {
                    let count = input.signature_count();
                    if count.saturating_mul(SIGNATURE_SIZE) > decoder.remaining() {
                        return Err(DecodeError::UnexpectedEof);
                    }
                    let mut ring = Vec::with_capacity(count);
                    for _ in 0..count {
                        ring.push(decoder.read_fixed::<SIGNATURE_SIZE>()?);
                    }
                    rings.push(ring);
                }
                TransactionSignatures::Full(rings)
            }
            SIGNATURES_TAG_PRUNED => TransactionSignatures::Pruned(PrunedSignatures {
                hash: decoder.read_hash()?,
                size: decoder.read_varint()?,
            }),
            _ => return Err(DecodeError::InvalidData("unknown signatures tag")),
        };
        Ok(Self { prefix, signatures })
    }
}
