use xid_consensus::params::{consensus_params, Network};
use xid_pow::next_difficulty;

const NETWORKS: [Network; 4] = [
    Network::Mainnet,
    Network::Stagenet,
    Network::Testnet,
    Network::Localnet,
];

#[test]
fn short_history_uses_configured_initial_difficulty() {
    for network in NETWORKS {
        let params = consensus_params(network);
        let table = &params.rules.difficulty;
        for version in table_versions(&params) {
            let expected = table.configured_initial_value(version);
            let actual = next_difficulty(table, version, &[1, 2], &[1, 2], params.block_time)
                .expect("initial difficulty");
            assert_eq!(actual, expected, "{network} v{version}");
        }
    }
}

#[test]
fn versions_select_their_algorithm() {
    let params = consensus_params(Network::Mainnet);
    let table = &params.rules.difficulty;
    let window = table.window_size(1) as u64;
    assert_eq!(table.window_size(2) as u64, window);

    // Timestamps run backwards: LWMA-2 sees negative solve times while
    // LWMA-3 forces them to one second each.
    let timestamps: Vec<u64> = (0..=window).map(|i| 10_000_000 - i * 10).collect();
    let cumulative: Vec<u64> = (0..=window).map(|i| (i + 1) * 1_000).collect();

    let v1 = next_difficulty(table, 1, &timestamps, &cumulative, params.block_time).expect("v1");
    let v2 = next_difficulty(table, 2, &timestamps, &cumulative, params.block_time).expect("v2");
    assert_eq!(v1, 1_080);
    assert_eq!(v2, 1_500);
}

fn table_versions(params: &xid_consensus::ConsensusParams) -> Vec<u8> {
    params.rules.block_versions.versions()
}
