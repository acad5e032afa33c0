use xid_primitives::block::{BlockFeatures, BlockHeader, BlockTemplate};
use xid_primitives::raw::RawBlock;
use xid_primitives::transaction::{
    BaseInput, KeyInput, PrunedSignatures, Transaction, TransactionInput, TransactionOutput,
    TransactionPrefix, TransactionSignatures,
};

fn seq_array<const N: usize>(start: u8) -> [u8; N] {
    std::array::from_fn(|i| start.wrapping_add(i as u8))
}

fn push_seq(buffer: &mut Vec<u8>, start: u8, len: usize) {
    for byte in 0..len {
        buffer.push(start.wrapping_add(byte as u8));
    }
}

fn key_spend() -> Transaction {
    Transaction {
        prefix: TransactionPrefix {
            version: 1,
            unlock_time: 300,
            inputs: vec![TransactionInput::Key(KeyInput {
                amount: 5,
                output_indices: vec![2, 1],
                key_image: seq_array::<32>(0x40),
            })],
            outputs: vec![TransactionOutput::to_key(4, seq_array::<32>(0x80))],
            extra: vec![0xee],
        },
        signatures: TransactionSignatures::Full(vec![vec![seq_array::<64>(0), seq_array::<64>(64)]]),
    }
}

#[test]
fn serialize_key_transaction() {
    let tx = key_spend();
    let mut expected = vec![
        0x01, // version
        0xac, 0x02, // unlock time 300
        0x01, // input count
        0x02, // key input tag
        0x05, // amount
        0x02, 0x02, 0x01, // offsets
    ];
    push_seq(&mut expected, 0x40, 32);
    expected.extend_from_slice(&[0x01, 0x04, 0x01]); // output count, amount, key tag
    push_seq(&mut expected, 0x80, 32);
    expected.extend_from_slice(&[0x01, 0xee]); // extra
    expected.push(0x01); // full signatures
    push_seq(&mut expected, 0, 128);

    assert_eq!(tx.to_bytes(), expected);
    assert_eq!(Transaction::from_bytes(&expected).expect("decode"), tx);
}

#[test]
fn serialize_pruned_signatures() {
    let mut tx = key_spend();
    tx.signatures = TransactionSignatures::Pruned(PrunedSignatures {
        hash: seq_array::<32>(0x10),
        size: 128,
    });
    let bytes = tx.to_bytes();
    let tail = &bytes[bytes.len() - 35..];
    assert_eq!(tail[0], 0x02);
    assert_eq!(&tail[1..33], &seq_array::<32>(0x10));
    assert_eq!(&tail[33..], &[0x80, 0x01]);
}

#[test]
fn serialize_template_with_static_reward() {
    let mut template = BlockTemplate {
        header: BlockHeader {
            major_version: 2,
            minor_version: 0,
            features: BlockFeatures::NONE,
            nonce: [0xde, 0xad, 0xbe, 0xef],
            timestamp: 0x0102_0304,
            previous_block_hash: seq_array::<32>(0x20),
        },
        base_transaction: Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 12,
                inputs: vec![TransactionInput::Base(BaseInput { height: 2 })],
                outputs: Vec::new(),
                extra: Vec::new(),
            },
            signatures: TransactionSignatures::Full(vec![Vec::new()]),
        },
        static_reward_hash: None,
        upgrade_vote: None,
        transaction_hashes: Vec::new(),
    };
    template.set_static_reward_hash(Some(seq_array::<32>(0x60)));

    let mut expected = vec![0x02, 0x00, 0x01, 0xde, 0xad, 0xbe, 0xef];
    expected.extend_from_slice(&0x0102_0304u64.to_le_bytes());
    push_seq(&mut expected, 0x20, 32);
    expected.extend_from_slice(&[0x01, 0x0c, 0x01, 0x01, 0x02, 0x00, 0x00, 0x01]);
    push_seq(&mut expected, 0x60, 32);
    expected.push(0x00);

    assert_eq!(template.to_bytes(), expected);
    assert_eq!(BlockTemplate::from_bytes(&expected).expect("decode"), template);
}

#[test]
fn raw_block_carries_decodable_parts() {
    let tx = key_spend();
    let template = BlockTemplate {
        header: BlockHeader {
            major_version: 1,
            minor_version: 0,
            features: BlockFeatures::NONE,
            nonce: [0; 4],
            timestamp: 1,
            previous_block_hash: [0u8; 32],
        },
        base_transaction: Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: 11,
                inputs: vec![TransactionInput::Base(BaseInput { height: 1 })],
                outputs: vec![TransactionOutput::to_key(10, [1u8; 32])],
                extra: Vec::new(),
            },
            signatures: TransactionSignatures::Full(vec![Vec::new()]),
        },
        static_reward_hash: None,
        upgrade_vote: None,
        transaction_hashes: vec![tx.hash()],
    };
    let raw = RawBlock::from_parts(&template, std::slice::from_ref(&tx));
    let decoded = RawBlock::from_bytes(&raw.to_bytes()).expect("raw");
    assert_eq!(decoded.template().expect("template"), template);
    assert_eq!(decoded.decode_transactions().expect("txs"), vec![tx]);
}
