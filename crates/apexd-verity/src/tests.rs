use super::*;
use anyhow::Result;
use apexd_core::{
    ApexFile, ApexImage, ApexManifest, HashAlgorithm, VerityData, VerityDescriptor,
    MANIFEST_ENTRY, ORIGINAL_APEX_ENTRY, PAYLOAD_ENTRY, PUBKEY_ENTRY, VERITY_ENTRY,
};
use apexd_security::salted_sha256;
use ed25519_dalek::{Signer, SigningKey};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

const SALT: &[u8] = b"apexd-test-salt";

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "apexd-verity-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test root");
    path
}

struct TestImage {
    path: PathBuf,
    manifest: ApexManifest,
    compressed: bool,
    payload: Vec<u8>,
}

impl TestImage {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            path: PathBuf::from("/apex/com.example.apex.apex"),
            manifest: ApexManifest {
                name: "com.example.apex".to_string(),
                version: 1,
                version_name: "1".to_string(),
                no_code: false,
                provide_shared_apex_libs: false,
                require_native_libs: Vec::new(),
            },
            compressed: false,
            payload,
        }
    }

    fn compressed(payload: Vec<u8>) -> Self {
        Self {
            compressed: true,
            ..Self::new(payload)
        }
    }
}

impl ApexImage for TestImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn manifest(&self) -> &ApexManifest {
        &self.manifest
    }

    fn is_compressed(&self) -> bool {
        self.compressed
    }

    fn payload_size(&self) -> Result<u64> {
        Ok(self.payload.len() as u64)
    }

    fn open_payload(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.payload.as_slice()))
    }

    fn bundled_public_key(&self) -> &[u8] {
        &[]
    }

    fn verify_apex_verity(&self, _public_key: &[u8]) -> Result<VerityData> {
        Ok(verity_for(&self.payload))
    }
}

fn patterned_payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|index| (index as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn verity_for(payload: &[u8]) -> VerityData {
    let tree = Hashtree::build(&mut &payload[..], 4096, SALT).expect("must build hashtree");
    VerityData {
        hash_algorithm: HashAlgorithm::Sha256,
        block_size: 4096,
        salt: SALT.to_vec(),
        root_digest: *tree.root_digest(),
    }
}

fn hashtree_error(err: &anyhow::Error) -> Option<&HashtreeError> {
    err.downcast_ref::<HashtreeError>()
}

fn dir_entry_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("must read dir")
        .map(|entry| {
            entry
                .expect("entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}

#[test]
fn layout_counts_levels_until_one_block() {
    let single = HashtreeLayout::for_payload(1, 4096).expect("must lay out");
    assert_eq!(single.level_count(), 1);
    assert_eq!(single.tree_size(), 4096);

    // 128 digests fill exactly one block.
    let full = HashtreeLayout::for_payload(128 * 4096, 4096).expect("must lay out");
    assert_eq!(full.level_count(), 1);
    assert_eq!(full.tree_size(), 4096);

    let two_levels = HashtreeLayout::for_payload(200 * 4096, 4096).expect("must lay out");
    assert_eq!(two_levels.level_count(), 2);
    assert_eq!(two_levels.tree_size(), 3 * 4096);
}

#[test]
fn layout_rejects_empty_payload_and_bad_block_size() {
    assert!(matches!(
        HashtreeLayout::for_payload(0, 4096),
        Err(HashtreeError::EmptyImage)
    ));
    assert!(matches!(
        HashtreeLayout::for_payload(10, 1000),
        Err(HashtreeError::InvalidBlockSize { block_size: 1000 })
    ));
    assert!(matches!(
        HashtreeLayout::for_payload(10, 256),
        Err(HashtreeError::InvalidBlockSize { block_size: 256 })
    ));
}

#[test]
fn single_block_tree_hashes_padded_block_then_top_level() {
    let payload = vec![7_u8; 100];
    let tree = Hashtree::build(&mut &payload[..], 512, SALT).expect("must build hashtree");

    let mut data_block = payload.clone();
    data_block.resize(512, 0);
    let mut top = salted_sha256(SALT, &data_block).to_vec();
    top.resize(512, 0);

    assert_eq!(tree.data_size(), 100);
    assert_eq!(tree.root_digest(), &salted_sha256(SALT, &top));

    let mut written = Vec::new();
    tree.write_to(&mut written).expect("must write tree");
    assert_eq!(written, top);
}

#[test]
fn multi_level_tree_is_written_top_down() {
    let payload = patterned_payload(20 * 512 + 3, 1);
    let tree = Hashtree::build(&mut &payload[..], 512, SALT).expect("must build hashtree");
    assert_eq!(tree.layout().level_count(), 2);

    let mut written = Vec::new();
    tree.write_to(&mut written).expect("must write tree");
    assert_eq!(written.len() as u64, tree.layout().tree_size());
    assert_eq!(written.len(), 3 * 512);

    let (top, bottom) = written.split_at(512);
    let expected_top: Vec<u8> = bottom
        .chunks(512)
        .flat_map(|chunk| salted_sha256(SALT, chunk))
        .chain(std::iter::repeat(0).take(512 - 2 * 32))
        .collect();
    assert_eq!(top, expected_top.as_slice());
    assert_eq!(tree.root_digest(), &salted_sha256(SALT, top));
}

#[test]
fn build_rejects_empty_payload() {
    let err = Hashtree::build(&mut &[0_u8; 0][..], 4096, SALT).expect_err("empty payload must fail");
    assert!(matches!(hashtree_error(&err), Some(HashtreeError::EmptyImage)));
}

#[test]
fn prepare_reuses_matching_tree_and_leaves_bytes_unchanged() {
    let root = test_root();
    let target = root.join("hashtree").join("com.example.apex");
    let image = TestImage::new(patterned_payload(3 * 4096 + 17, 3));
    let verity = verity_for(&image.payload);

    let first = prepare_hash_tree(&image, &verity, &target).expect("must prepare hashtree");
    assert_eq!(first, PrepareHashTreeResult::Regenerate);
    let bytes = fs::read(&target).expect("must read hashtree");
    assert_eq!(
        bytes.len() as u64,
        HashtreeLayout::for_payload(image.payload.len() as u64, 4096)
            .expect("must lay out")
            .tree_size()
    );

    let second = prepare_hash_tree(&image, &verity, &target).expect("must prepare hashtree");
    assert_eq!(second, PrepareHashTreeResult::Reuse);
    assert_eq!(fs::read(&target).expect("must read hashtree"), bytes);
    assert_eq!(
        dir_entry_names(target.parent().expect("parent")),
        vec!["com.example.apex".to_string()]
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prepare_regenerates_for_different_digest() {
    let root = test_root();
    let target = root.join("com.example.apex");
    let old_image = TestImage::new(patterned_payload(5 * 4096, 4));
    let new_image = TestImage::new(patterned_payload(5 * 4096, 5));

    prepare_hash_tree(&old_image, &verity_for(&old_image.payload), &target)
        .expect("must prepare hashtree");
    let old_bytes = fs::read(&target).expect("must read hashtree");

    let result = prepare_hash_tree(&new_image, &verity_for(&new_image.payload), &target)
        .expect("must prepare hashtree");
    assert_eq!(result, PrepareHashTreeResult::Regenerate);
    let new_bytes = fs::read(&target).expect("must read hashtree");
    assert_eq!(old_bytes.len(), new_bytes.len());
    assert_ne!(old_bytes, new_bytes);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prepare_regenerates_corrupt_or_truncated_tree() {
    let root = test_root();
    let target = root.join("com.example.apex");
    let image = TestImage::new(patterned_payload(300 * 4096, 6));
    let verity = verity_for(&image.payload);

    prepare_hash_tree(&image, &verity, &target).expect("must prepare hashtree");
    let good = fs::read(&target).expect("must read hashtree");

    let mut corrupt = good.clone();
    corrupt[0] ^= 0xff;
    fs::write(&target, &corrupt).expect("must corrupt hashtree");
    assert_eq!(
        prepare_hash_tree(&image, &verity, &target).expect("must prepare hashtree"),
        PrepareHashTreeResult::Regenerate
    );
    assert_eq!(fs::read(&target).expect("must read hashtree"), good);

    fs::write(&target, &good[..4096]).expect("must truncate hashtree");
    assert_eq!(
        prepare_hash_tree(&image, &verity, &target).expect("must prepare hashtree"),
        PrepareHashTreeResult::Regenerate
    );
    assert_eq!(fs::read(&target).expect("must read hashtree"), good);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prepare_fails_for_compressed_image_regardless_of_target() {
    let root = test_root();
    let target = root.join("com.example.apex");
    let regular = TestImage::new(patterned_payload(4096, 7));
    let compressed = TestImage::compressed(regular.payload.clone());
    let verity = verity_for(&regular.payload);

    let err = prepare_hash_tree(&compressed, &verity, &target)
        .expect_err("compressed image must fail");
    assert!(matches!(
        hashtree_error(&err),
        Some(HashtreeError::CompressedImage { .. })
    ));
    assert!(err
        .to_string()
        .contains("cannot prepare hashtree of compressed package"));
    assert!(!target.exists());

    prepare_hash_tree(&regular, &verity, &target).expect("must prepare hashtree");
    let err = prepare_hash_tree(&compressed, &verity, &target)
        .expect_err("compressed image must fail with a valid tree present");
    assert!(matches!(
        hashtree_error(&err),
        Some(HashtreeError::CompressedImage { .. })
    ));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prepare_rejects_root_mismatch_and_keeps_target() {
    let root = test_root();
    let target = root.join("com.example.apex");
    fs::write(&target, b"previous side file").expect("must write target");
    let image = TestImage::new(patterned_payload(2 * 4096, 8));
    let verity = VerityData {
        root_digest: [0xab; 32],
        ..verity_for(&image.payload)
    };

    let err = prepare_hash_tree(&image, &verity, &target).expect_err("mismatch must fail");
    match hashtree_error(&err) {
        Some(HashtreeError::RootDigestMismatch { expected, .. }) => {
            assert_eq!(expected, &"ab".repeat(32));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        fs::read(&target).expect("must read target"),
        b"previous side file"
    );
    assert_eq!(dir_entry_names(&root), vec!["com.example.apex".to_string()]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prepare_rejects_empty_payload() {
    let root = test_root();
    let image = TestImage::new(Vec::new());
    let err = prepare_hash_tree(&image, &VerityData::default(), &root.join("empty"))
        .expect_err("empty payload must fail");
    assert!(matches!(hashtree_error(&err), Some(HashtreeError::EmptyImage)));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn manager_prepares_and_removes_side_files_by_package_name() {
    let root = test_root();
    let manager = HashtreeManager::new(root.join("hashtree"));
    assert_eq!(
        manager.hashtree_path_for("com.example.apex"),
        root.join("hashtree").join("com.example.apex")
    );

    let image = TestImage::new(patterned_payload(4096 + 1, 9));
    let verity = image.verify_apex_verity(&[]).expect("must verify");
    assert_eq!(
        manager.prepare(&image, &verity).expect("must prepare"),
        PrepareHashTreeResult::Regenerate
    );
    assert_eq!(
        manager.prepare(&image, &verity).expect("must prepare"),
        PrepareHashTreeResult::Reuse
    );

    assert!(manager
        .remove_hash_tree("com.example.apex")
        .expect("must remove hashtree"));
    assert!(!manager
        .remove_hash_tree("com.example.apex")
        .expect("second removal must succeed"));
    assert!(!manager.hashtree_path_for("com.example.apex").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn bundle_verity_drives_hashtree_preparation() {
    let root = test_root();
    let bundle = root.join("bundle");
    fs::create_dir_all(&bundle).expect("must create bundle dir");
    let payload = patterned_payload(10 * 4096 + 5, 10);
    let key = SigningKey::from_bytes(&[21_u8; 32]);

    let mut descriptor = VerityDescriptor {
        hash_algorithm: HashAlgorithm::Sha256,
        block_size: 4096,
        salt: hex::encode(SALT),
        root_digest: verity_for(&payload).root_digest_hex(),
        signature: String::new(),
    };
    descriptor.signature = hex::encode(key.sign(&descriptor.signing_payload()).to_bytes());

    fs::write(
        bundle.join(MANIFEST_ENTRY),
        r#"{"name": "com.example.apex", "version": 2}"#,
    )
    .expect("must write manifest");
    fs::write(bundle.join(PUBKEY_ENTRY), key.verifying_key().as_bytes()).expect("must write key");
    fs::write(
        bundle.join(VERITY_ENTRY),
        descriptor.to_json_string().expect("must serialize descriptor"),
    )
    .expect("must write descriptor");
    fs::write(bundle.join(PAYLOAD_ENTRY), &payload).expect("must write payload");

    let apex = ApexFile::open(&bundle).expect("must open bundle");
    let verity = apex
        .verify_apex_verity(apex.bundled_public_key())
        .expect("must verify verity data");
    let manager = HashtreeManager::new(root.join("hashtree"));
    assert_eq!(
        manager.prepare(&apex, &verity).expect("must prepare"),
        PrepareHashTreeResult::Regenerate
    );
    assert_eq!(
        manager.prepare(&apex, &verity).expect("must prepare"),
        PrepareHashTreeResult::Reuse
    );

    fs::remove_file(bundle.join(PAYLOAD_ENTRY)).expect("must remove payload");
    fs::write(bundle.join(ORIGINAL_APEX_ENTRY), &payload).expect("must write original");
    let compressed = ApexFile::open(&bundle).expect("must open compressed bundle");
    let err = manager
        .prepare(&compressed, &verity)
        .expect_err("compressed bundle must fail");
    assert!(matches!(
        hashtree_error(&err),
        Some(HashtreeError::CompressedImage { .. })
    ));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn prepare_creates_missing_hashtree_dir_with_full_tree() {
    let root = test_root();
    let manager = HashtreeManager::new(root.join("apex-hashtree"));
    let image = TestImage::new(patterned_payload(200 * 4096 + 17, 6));
    let verity = verity_for(&image.payload);

    let result = manager.prepare(&image, &verity).expect("must prepare hashtree");
    assert_eq!(result, PrepareHashTreeResult::Regenerate);

    let tree = Hashtree::build(&mut &image.payload[..], 4096, SALT).expect("must build");
    assert_eq!(tree.data_size(), image.payload.len() as u64);
    assert_eq!(tree.layout().level_count(), 2);
    let mut expected = Vec::new();
    tree.write_to(&mut expected).expect("must write tree");
    assert_eq!(
        fs::read(manager.hashtree_path_for("com.example.apex")).expect("must read"),
        expected
    );
    assert_eq!(
        dir_entry_names(manager.hashtree_dir()),
        vec!["com.example.apex".to_string()]
    );

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn prepare_succeeds_when_hashtree_dir_cannot_be_synced() {
    use std::os::unix::fs::PermissionsExt;

    let root = test_root();
    let dir = root.join("apex-hashtree");
    fs::create_dir_all(&dir).expect("must create dir");
    let target = dir.join("com.example.apex");
    let image = TestImage::new(patterned_payload(3 * 4096, 8));

    fs::set_permissions(&dir, fs::Permissions::from_mode(0o300)).expect("must chmod");
    let result = prepare_hash_tree(&image, &verity_for(&image.payload), &target);
    fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).expect("must restore");

    assert_eq!(
        result.expect("renamed tree is in place"),
        PrepareHashTreeResult::Regenerate
    );
    let reused = prepare_hash_tree(&image, &verity_for(&image.payload), &target)
        .expect("must prepare hashtree");
    assert_eq!(reused, PrepareHashTreeResult::Reuse);

    let _ = fs::remove_dir_all(&root);
}
