use xid_consensus::Hash256;
use xid_primitives::block::{BlockFeatures, BlockHeader, BlockTemplate};
use xid_primitives::encoding::{decode, encode, DecodeError};
use xid_primitives::transaction::{
    BaseInput, KeyInput, Transaction, TransactionInput, TransactionOutput, TransactionPrefix,
    TransactionSignatures,
};

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    fn next_u8(&mut self) -> u8 {
        (self.next_u64() >> 56) as u8
    }

    fn gen_range(&mut self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            (self.next_u64() % max as u64) as usize
        }
    }
}

fn fill_bytes<const N: usize>(rng: &mut Lcg) -> [u8; N] {
    std::array::from_fn(|_| rng.next_u8())
}

fn random_hash(rng: &mut Lcg) -> Hash256 {
    fill_bytes::<32>(rng)
}

fn random_vec(rng: &mut Lcg, max_len: usize) -> Vec<u8> {
    let len = rng.gen_range(max_len + 1);
    (0..len).map(|_| rng.next_u8()).collect()
}

fn random_key_input(rng: &mut Lcg) -> KeyInput {
    let ring = 1 + rng.gen_range(4);
    let mut absolute = Vec::with_capacity(ring);
    let mut next = rng.gen_range(50) as u32;
    for _ in 0..ring {
        absolute.push(next);
        next += 1 + rng.gen_range(1_000) as u32;
    }
    KeyInput::from_absolute(rng.next_u64() >> 20, &absolute, random_hash(rng))
}

fn random_transaction(rng: &mut Lcg) -> Transaction {
    let inputs: Vec<TransactionInput> = (0..1 + rng.gen_range(3))
        .map(|_| TransactionInput::Key(random_key_input(rng)))
        .collect();
    let outputs = (0..rng.gen_range(4))
        .map(|_| TransactionOutput::to_key(rng.next_u64() >> 24, random_hash(rng)))
        .collect();
    let rings = inputs
        .iter()
        .map(|input| {
            (0..input.signature_count())
                .map(|_| fill_bytes::<64>(rng))
                .collect()
        })
        .collect();
    Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: rng.next_u64() % 1_000_000_000,
            inputs,
            outputs,
            extra: random_vec(rng, 40),
        },
        signatures: TransactionSignatures::Full(rings),
    }
}

fn random_template(rng: &mut Lcg) -> BlockTemplate {
    let mut template = BlockTemplate {
        header: BlockHeader {
            major_version: 1 + rng.gen_range(3) as u8,
            minor_version: rng.next_u8(),
            features: BlockFeatures::NONE,
            nonce: fill_bytes::<4>(rng),
            timestamp: rng.next_u64() >> 30,
            previous_block_hash: random_hash(rng),
        },
        base_transaction: Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: u64::from(rng.next_u32() % 1_000),
                inputs: vec![TransactionInput::Base(BaseInput {
                    height: rng.next_u32(),
                })],
                outputs: vec![TransactionOutput::to_key(rng.next_u64() >> 16, random_hash(rng))],
                extra: random_vec(rng, 16),
            },
            signatures: TransactionSignatures::Full(vec![Vec::new()]),
        },
        static_reward_hash: None,
        upgrade_vote: None,
        transaction_hashes: (0..rng.gen_range(5)).map(|_| random_hash(rng)).collect(),
    };
    if rng.next_u8() & 1 == 1 {
        template.set_static_reward_hash(Some(random_hash(rng)));
    }
    if rng.next_u8() & 1 == 1 {
        template.set_upgrade_vote(Some(rng.next_u8()));
    }
    template
}

#[test]
fn transactions_round_trip_with_identical_hash() {
    let mut rng = Lcg::new(0x1234);
    for _ in 0..300 {
        let tx = random_transaction(&mut rng);
        assert!(tx.signatures_consistent());
        let bytes = tx.to_bytes();
        let decoded = Transaction::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash(), tx.hash());
        assert_eq!(decoded.to_bytes(), bytes);
    }
}

#[test]
fn templates_round_trip_with_identical_hash() {
    let mut rng = Lcg::new(99);
    for _ in 0..300 {
        let template = random_template(&mut rng);
        let bytes = encode(&template);
        let decoded: BlockTemplate = decode(&bytes).expect("decode");
        assert!(decoded.is_consistent());
        assert_eq!(decoded, template);
        assert_eq!(decoded.hash(), template.hash());
    }
}

#[test]
fn pruning_twice_equals_pruning_once() {
    let mut rng = Lcg::new(5);
    for _ in 0..200 {
        let original = random_transaction(&mut rng);
        let expected_hash = original.signatures_hash();
        let mut once = original.clone();
        once.prune();
        let mut twice = once.clone();
        twice.prune();
        assert_eq!(once, twice);
        assert_eq!(once.signatures_hash(), expected_hash);
        assert_eq!(once.hash(), original.hash());
    }
}

#[test]
fn truncation_never_panics() {
    let mut rng = Lcg::new(77);
    for _ in 0..100 {
        let bytes = random_transaction(&mut rng).to_bytes();
        let cut = rng.gen_range(bytes.len());
        match Transaction::from_bytes(&bytes[..cut]) {
            Err(DecodeError::UnexpectedEof) | Err(DecodeError::InvalidData(_)) => {}
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("decoded a truncated transaction"),
        }
    }
}
