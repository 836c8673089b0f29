// scenarios.rs - End-to-end clustering scenarios through the public API

use popbhc::core::LeaderSeeder;
use popbhc::prelude::*;

fn store_of(pairs: &[(&str, &str)]) -> SparseCountStore {
    let alignment = Alignment::from_pairs(pairs).unwrap();
    SparseCountStore::from_alignment(&alignment).unwrap()
}

fn symmetric(store: &SparseCountStore) -> Prior {
    PriorOptimizer::default()
        .optimize(store, PriorType::Symmetric)
        .unwrap()
}

#[test]
fn identical_sequences_form_one_cluster() {
    let store = store_of(&[
        ("s1", "ACGTA"),
        ("s2", "ACGTA"),
        ("s3", "ACGTA"),
        ("s4", "ACGTA"),
    ]);
    let prior = symmetric(&store);
    let dendrogram = BhcEngine::default().build(&store, &prior, None).unwrap();
    let partition = PartitionSelector::default().partition(&dendrogram).unwrap();
    assert_eq!(partition.n_clusters(), 1);
    assert_eq!(partition.labels(), &[1, 1, 1, 1]);
}

#[test]
fn two_divergent_pairs_form_two_clusters() {
    let store = store_of(&[
        ("a1", "AAAAAAAA"),
        ("c1", "CCCCCCCC"),
        ("a2", "AAAAAAAA"),
        ("c2", "CCCCCCCC"),
    ]);
    let prior = symmetric(&store);
    let dendrogram = BhcEngine::default().build(&store, &prior, None).unwrap();
    let partition = PartitionSelector::default().partition(&dendrogram).unwrap();
    assert_eq!(partition.n_clusters(), 2);
    assert!(partition.co_clustered(0, 2));
    assert!(partition.co_clustered(1, 3));
    assert!(!partition.co_clustered(0, 1));
    assert_eq!(partition.cluster_sizes(), vec![2, 2]);
}

#[test]
fn optimised_prior_needs_segregating_sites() {
    let store = store_of(&[("s1", "ACGT"), ("s2", "ACGT"), ("s3", "ACGT")]);
    let err = PriorOptimizer::default()
        .optimize(&store, PriorType::OptimiseSymmetric)
        .unwrap_err();
    assert!(matches!(err, BapsError::EmptyInput { .. }));
}

#[test]
fn unknown_tree_leaf_is_rejected() {
    let store = store_of(&[
        ("a", "AAAC"),
        ("b", "AAAC"),
        ("c", "CCCA"),
        ("d", "CCCA"),
    ]);
    let prior = symmetric(&store);
    let tree = ExternalTree::from_newick_str("((a,b),(c,x));").unwrap();
    let err = Dendrogram::from_tree(&store, &prior, &tree, None).unwrap_err();
    assert!(matches!(err, BapsError::InvalidTree { .. }));
}

#[test]
fn external_tree_partition_follows_tree() {
    let store = store_of(&[
        ("a", "AAAAAAAA"),
        ("b", "AAAAAAAA"),
        ("c", "CCCCCCCC"),
        ("d", "CCCCCCCC"),
    ]);
    let prior = symmetric(&store);
    let tree = ExternalTree::from_newick_str("((a,b),(c,d));").unwrap();
    let partition = PartitionSelector::default()
        .partition_tree(&store, &prior, &tree, None)
        .unwrap();
    assert_eq!(partition.n_clusters(), 2);
    assert!(partition.co_clustered(0, 1));
    assert!(partition.co_clustered(2, 3));
}

#[test]
fn nested_levels_refine_each_other() {
    let store = store_of(&[
        ("a1", "AAAAAAAAAAAAAAAA"),
        ("a2", "AAAAAAAAAAAAAAAT"),
        ("a3", "AAAAAAAATTTTTTTA"),
        ("a4", "AAAAAAAATTTTTTTT"),
        ("c1", "CCCCCCCCCCCCCCCC"),
        ("c2", "CCCCCCCCCCCCCCCG"),
        ("c3", "CCCCCCCCGGGGGGGC"),
        ("c4", "CCCCCCCCGGGGGGGG"),
    ]);
    let partitioner = MultiResolutionPartitioner::new(
        BhcEngine::default(),
        PartitionSelector::default(),
        PriorOptimizer::default(),
        PriorType::Symmetric,
        2,
    );
    let result = partitioner.run(&store, 3).unwrap();
    assert_eq!(result.n_levels(), 3);
    for pair in result.levels.windows(2) {
        assert!(pair[1].partition.is_refinement_of(&pair[0].partition));
        assert!(pair[1].partition.n_clusters() >= pair[0].partition.n_clusters());
    }
}

#[test]
fn bootstrap_matrix_is_symmetric_with_full_diagonal() {
    let store = store_of(&[
        ("a1", "AAAAAAAAAA"),
        ("a2", "AAAAAAAAAC"),
        ("c1", "CCCCCCCCCC"),
        ("c2", "CCCCCCCCCA"),
    ]);
    let prior = symmetric(&store);
    let estimator =
        BootstrapEstimator::new(BhcEngine::default(), PartitionSelector::default(), 11);
    let matrix = estimator.bootstrap(&store, &prior, 8).unwrap();
    assert_eq!(matrix.replicates() + matrix.failed(), 8);
    assert!(matrix.is_symmetric());
    for i in 0..matrix.n() {
        assert_eq!(matrix.get(i, i) as usize, matrix.replicates());
    }
}

#[test]
fn leader_seeds_never_exceed_k_init() {
    let rows: Vec<(String, String)> = (0..12)
        .map(|i| {
            let seq: String = (0..12)
                .map(|j| if (i + j) % 3 == 0 { 'A' } else { 'G' })
                .collect();
            (format!("s{}", i), seq)
        })
        .collect();
    let alignment = Alignment::from_pairs(&rows).unwrap();
    let store = SparseCountStore::from_alignment(&alignment).unwrap();
    let seed = LeaderSeeder::new(5).seed(&store).unwrap();
    assert!(seed.n_clusters() <= 5);
    assert_eq!(seed.len(), 12);
}

#[test]
fn partition_file_is_written_with_header() {
    let store = store_of(&[
        ("a1", "AAAAAAAA"),
        ("c1", "CCCCCCCC"),
        ("a2", "AAAAAAAA"),
        ("c2", "CCCCCCCC"),
    ]);
    let prior = symmetric(&store);
    let dendrogram = BhcEngine::default().build(&store, &prior, None).unwrap();
    let partition = PartitionSelector::default().partition(&dendrogram).unwrap();

    let path = std::env::temp_dir().join(format!("popbhc_scenario_{}.tsv", std::process::id()));
    let path_str = path.to_string_lossy().into_owned();
    write_partition(&path_str, "tsv", store.names(), &partition, "popbhc test").unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("# Command: popbhc test"));
    let rows: Vec<&str> = content.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(rows.len(), 5);
    assert!(rows.contains(&"a1\t1"));
    assert!(rows.contains(&"a2\t1"));
    assert!(rows.contains(&"c1\t2"));
    std::fs::remove_file(&path).ok();
}
