use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::json;

use mintforge_core::{Catalog, ImageComposite};
use mintforge_generate::{
    BlobStore, CompositeError, Compositor, GenerateOptions, GenerationEngine, GenerationError,
    InMemoryBlobStore, InMemoryCatalogReader, InMemoryCompositeStore, RunDescriptor, StagingArea,
    StorageError,
};

fn png(color: [u8; 4]) -> Vec<u8> {
    let mut img = RgbaImage::new(4, 4);
    img.put_pixel(1, 1, Rgba(color));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// Staging root of one test, removed when the test ends.
struct StagingRoot(PathBuf);

impl StagingRoot {
    fn new(label: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "mintforge_generate_{label}_{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        Self(dir)
    }

    fn path(&self) -> &Path {
        &self.0
    }

    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            staging_root: self.0.clone(),
            seed: Some(42),
            ..GenerateOptions::default()
        }
    }
}

impl Drop for StagingRoot {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn blobs_for(catalog: &Catalog) -> Arc<InMemoryBlobStore> {
    let blobs = InMemoryBlobStore::new("https://cdn.example");
    for (idx, layer) in catalog.image_layers.iter().enumerate() {
        blobs.insert(&layer.bucket_filename, png([(idx as u8).wrapping_mul(40), 0, 0, 255]));
    }
    Arc::new(blobs)
}

fn engine(
    staging: &StagingRoot,
    catalog: &Catalog,
    blobs: Arc<dyn BlobStore>,
    store: Arc<InMemoryCompositeStore>,
) -> GenerationEngine {
    GenerationEngine::new(
        staging.options(),
        Arc::new(InMemoryCatalogReader::new([catalog.clone()])),
        blobs,
        store,
    )
}

fn run() -> RunDescriptor {
    RunDescriptor {
        project_id: "p".to_string(),
        collection_id: "c".to_string(),
        composite_group_id: "g1".to_string(),
        trait_set_id: None,
    }
}

fn group(id: &str) -> RunDescriptor {
    RunDescriptor {
        composite_group_id: id.to_string(),
        ..run()
    }
}

async fn uploaded_pixel(blobs: &InMemoryBlobStore, index: u64, x: u32, y: u32) -> [u8; 4] {
    let bytes = blobs
        .get(&format!("p/c/g1/{index}.png"))
        .await
        .expect("uploaded composite");
    let img = image::load_from_memory(&bytes).expect("decode").to_rgba8();
    img.get_pixel(x, y).0
}

fn catalog(supply: u64, body: serde_json::Value) -> Catalog {
    let mut value = json!({
        "catalog_version": "0.1",
        "project_id": "p",
        "collection": { "id": "c", "name": "Test", "supply": supply }
    });
    if let (Some(target), Some(extra)) = (value.as_object_mut(), body.as_object()) {
        for (key, field) in extra {
            target.insert(key.clone(), field.clone());
        }
    }
    serde_json::from_value(value).expect("catalog json")
}

fn value_of<'a>(composite: &'a ImageComposite, trait_id: &str) -> Option<&'a str> {
    composite
        .traits
        .iter()
        .find(|slot| slot.trait_id == trait_id)
        .and_then(|slot| slot.trait_value_id.as_deref())
}

fn single_background(supply: u64) -> Catalog {
    catalog(
        supply,
        json!({
            "traits": [{ "id": "bg", "name": "Background", "z_index": 0 }],
            "trait_values": [{ "id": "red", "trait_id": "bg", "name": "Red", "rarity": 1.0 }],
            "image_layers": [{ "id": "l-red", "trait_value_id": "red", "bucket_filename": "red.png" }]
        }),
    )
}

fn varied(supply: u64) -> Catalog {
    catalog(
        supply,
        json!({
            "traits": [
                { "id": "bg", "name": "Background", "z_index": 0 },
                { "id": "fur", "name": "Fur", "z_index": 1 },
                { "id": "hat", "name": "Hat", "z_index": 2 }
            ],
            "trait_values": [
                { "id": "bg-red", "trait_id": "bg", "name": "Red", "rarity": 0.4 },
                { "id": "bg-blue", "trait_id": "bg", "name": "Blue", "rarity": 0.3 },
                { "id": "bg-green", "trait_id": "bg", "name": "Green", "rarity": 0.3 },
                { "id": "fur-black", "trait_id": "fur", "name": "Black", "rarity": 0.5 },
                { "id": "fur-white", "trait_id": "fur", "name": "White", "rarity": 0.5 },
                { "id": "hat-cap", "trait_id": "hat", "name": "Cap", "rarity": 0.5 },
                { "id": "hat-top", "trait_id": "hat", "name": "Top", "rarity": 0.5 }
            ],
            "image_layers": [
                { "id": "l-bg-red", "trait_value_id": "bg-red", "bucket_filename": "bg-red.png" },
                { "id": "l-bg-blue", "trait_value_id": "bg-blue", "bucket_filename": "bg-blue.png" },
                { "id": "l-bg-green", "trait_value_id": "bg-green", "bucket_filename": "bg-green.png" },
                { "id": "l-fur-black", "trait_value_id": "fur-black", "bucket_filename": "fur-black.png" },
                {
                    "id": "l-fur-white",
                    "trait_value_id": "fur-white",
                    "bucket_filename": "fur-white.png",
                    "companion_layer_id": "l-tail",
                    "companion_layer_z_index": 5
                },
                { "id": "l-tail", "bucket_filename": "tail.png" },
                { "id": "l-hat-cap", "trait_value_id": "hat-cap", "bucket_filename": "hat-cap.png" },
                { "id": "l-hat-top", "trait_value_id": "hat-top", "bucket_filename": "hat-top.png" }
            ]
        }),
    )
}

fn named(supply: u64) -> Catalog {
    catalog(
        supply,
        json!({
            "traits": [
                { "id": "bg", "name": "Background", "z_index": 0 },
                { "id": "name", "name": "Name", "z_index": 1, "is_always_unique": true }
            ],
            "trait_values": [
                { "id": "red", "trait_id": "bg", "name": "Red", "rarity": 1.0 },
                { "id": "tom", "trait_id": "name", "name": "Tom" },
                { "id": "kit", "trait_id": "name", "name": "Kit" },
                { "id": "mog", "trait_id": "name", "name": "Mog" },
                { "id": "pip", "trait_id": "name", "name": "Pip" }
            ],
            "image_layers": [
                { "id": "l-red", "trait_value_id": "red", "bucket_filename": "red.png" },
                { "id": "l-tom", "trait_value_id": "tom", "bucket_filename": "tom.png" },
                { "id": "l-kit", "trait_value_id": "kit", "bucket_filename": "kit.png" },
                { "id": "l-mog", "trait_value_id": "mog", "bucket_filename": "mog.png" },
                { "id": "l-pip", "trait_value_id": "pip", "bucket_filename": "pip.png" }
            ]
        }),
    )
}

#[tokio::test]
async fn saturated_single_value_abandons_later_indices() {
    let staging = StagingRoot::new("saturated");
    // One trait with a single value of rarity 1.0 admits exactly one combination.
    let catalog = single_background(3);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store.clone());

    let result = engine.generate(&run(), 0..3).await.expect("generate");

    assert_eq!(result.composites.len(), 3);
    assert!(result.composites[0].is_some());
    assert!(result.composites[1].is_none());
    assert!(result.composites[2].is_none());
    assert_eq!(result.report.generated, 1);
    assert_eq!(result.report.abandoned, 2);
    assert_eq!(result.report.issues_by_code.get("sampling_exhausted"), Some(&2));
    assert_eq!(store.composites().len(), 1);

    let first = result.composites[0].as_ref().expect("first composite");
    assert_eq!(first.index, 0);
    assert_eq!(value_of(first, "bg"), Some("red"));
    assert_eq!(first.image_url.as_deref(), Some("https://cdn.example/p/c/g1/0.png"));
}

#[tokio::test]
async fn traits_hashes_are_pairwise_distinct() {
    let staging = StagingRoot::new("distinct");
    let catalog = varied(10);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store.clone());

    let result = engine.generate(&run(), 0..10).await.expect("generate");

    assert_eq!(result.composites.len(), 10);
    assert_eq!(
        result.report.generated + result.report.abandoned,
        result.report.requested
    );
    let hashes: BTreeSet<&str> = result.generated().map(|c| c.traits_hash.as_str()).collect();
    assert_eq!(hashes.len() as u64, result.report.generated);
    assert!(result.report.generated >= 8, "{:?}", result.report);

    for (offset, composite) in result.composites.iter().enumerate() {
        if let Some(composite) = composite {
            assert_eq!(composite.index, offset as u64);
            for slot in &composite.traits {
                let expected = slot.trait_value_id.as_ref().map(|id| format!("l-{id}"));
                assert_eq!(slot.image_layer_id, expected);
            }
        }
    }
}

#[tokio::test]
async fn always_unique_values_are_used_at_most_once() {
    let staging = StagingRoot::new("unique_names");
    let catalog = named(6);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store.clone());

    let result = engine.generate(&run(), 0..6).await.expect("generate");

    let names: Vec<&str> = result.generated().filter_map(|c| value_of(c, "name")).collect();
    let distinct: BTreeSet<&str> = names.iter().copied().collect();
    assert_eq!(names.len(), 4);
    assert_eq!(distinct.len(), 4);

    // Once the names run out the only fresh combination is the unnamed one.
    assert_eq!(result.report.generated, 5);
    assert_eq!(result.report.abandoned, 1);
    assert!(result.composites[5].is_none());
}

#[tokio::test]
async fn later_batches_respect_earlier_consumption() {
    let staging = StagingRoot::new("resume");
    let catalog = named(6);
    let store = Arc::new(InMemoryCompositeStore::new());
    let blobs = blobs_for(&catalog);

    let first = engine(&staging, &catalog, blobs.clone(), store.clone())
        .generate(&run(), 0..2)
        .await
        .expect("first batch");
    let second = engine(&staging, &catalog, blobs, store.clone())
        .generate(&run(), 2..6)
        .await
        .expect("second batch");

    assert_eq!(first.report.generated, 2);
    let all = store.composites();
    let names: Vec<&str> = all.iter().filter_map(|c| value_of(c, "name")).collect();
    let distinct: BTreeSet<&str> = names.iter().copied().collect();
    assert_eq!(names.len(), distinct.len());
    assert_eq!(names.len(), 4);

    let hashes: BTreeSet<&str> = all.iter().map(|c| c.traits_hash.as_str()).collect();
    assert_eq!(hashes.len(), all.len());
    assert_eq!(second.composites.len(), 4);
}

#[tokio::test]
async fn drop_first_conflict_clears_the_first_trait() {
    let staging = StagingRoot::new("conflicts");
    let catalog = catalog(
        4,
        json!({
            "traits": [
                { "id": "a", "name": "A", "z_index": 0 },
                { "id": "b", "name": "B", "z_index": 1 }
            ],
            "trait_values": [
                { "id": "red", "trait_id": "a", "name": "Red", "rarity": 1.0 },
                { "id": "green", "trait_id": "b", "name": "Green", "rarity": 0.5 },
                { "id": "white", "trait_id": "b", "name": "White", "rarity": 0.5 }
            ],
            "image_layers": [
                { "id": "l-red", "trait_value_id": "red", "bucket_filename": "red.png" },
                { "id": "l-green", "trait_value_id": "green", "bucket_filename": "green.png" },
                { "id": "l-white", "trait_value_id": "white", "bucket_filename": "white.png" }
            ],
            "conflicts": [{
                "trait1_id": "a",
                "trait1_value_id": "red",
                "trait2_id": "b",
                "trait2_value_id": "green",
                "resolution_type": "drop_first"
            }]
        }),
    );
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store);

    let result = engine.generate(&run(), 0..4).await.expect("generate");

    assert_eq!(result.report.generated, 2);
    for composite in result.generated() {
        match value_of(composite, "b") {
            Some("green") => assert_eq!(value_of(composite, "a"), None),
            Some("white") => assert_eq!(value_of(composite, "a"), Some("red")),
            other => panic!("unexpected value {other:?}"),
        }
    }
    assert_eq!(result.report.conflicts_resolved, 1);
}

#[tokio::test]
async fn resolved_combinations_are_checked_for_reuse() {
    let staging = StagingRoot::new("resolved_hash");
    // Both (red, green) and (none, green) resolve to (none, green), so only
    // one item per group may exist whichever is drawn first.
    let catalog = catalog(
        2,
        json!({
            "traits": [
                { "id": "a", "name": "A", "z_index": 0 },
                { "id": "b", "name": "B", "z_index": 1 }
            ],
            "trait_values": [
                { "id": "red", "trait_id": "a", "name": "Red", "rarity": 0.5 },
                { "id": "green", "trait_id": "b", "name": "Green", "rarity": 1.0 }
            ],
            "image_layers": [
                { "id": "l-red", "trait_value_id": "red", "bucket_filename": "red.png" },
                { "id": "l-green", "trait_value_id": "green", "bucket_filename": "green.png" }
            ],
            "conflicts": [{
                "trait1_id": "a",
                "trait1_value_id": "red",
                "trait2_id": "b",
                "trait2_value_id": "green",
                "resolution_type": "drop_first"
            }]
        }),
    );
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store.clone());
    let budget = u64::from(staging.options().max_draw_attempts);

    for id in ["g0", "g1", "g2", "g3", "g4", "g5", "g6", "g7"] {
        let result = engine.generate(&group(id), 0..2).await.expect("generate");

        assert_eq!(result.report.generated, 1, "group {id}");
        assert_eq!(result.report.abandoned, 1, "group {id}");
        assert!(result.report.draw_attempts > budget);
        let composite = result.generated().next().expect("one composite");
        assert_eq!(value_of(composite, "a"), None);
        assert_eq!(value_of(composite, "b"), Some("green"));
    }

    let stored = store.composites();
    assert_eq!(stored.len(), 8);
    let per_group: BTreeSet<(&str, &str)> = stored
        .iter()
        .map(|c| (c.composite_group_id.as_str(), c.traits_hash.as_str()))
        .collect();
    assert_eq!(per_group.len(), 8);
}

#[tokio::test]
async fn randomize_first_rerolls_the_conflicting_value() {
    let staging = StagingRoot::new("randomize");
    let catalog = catalog(
        1,
        json!({
            "traits": [
                { "id": "a", "name": "A", "z_index": 0 },
                { "id": "b", "name": "B", "z_index": 1 }
            ],
            "trait_values": [
                { "id": "red", "trait_id": "a", "name": "Red", "rarity": 0.5 },
                { "id": "blue", "trait_id": "a", "name": "Blue", "rarity": 0.5 },
                { "id": "green", "trait_id": "b", "name": "Green", "rarity": 1.0 }
            ],
            "image_layers": [
                { "id": "l-red", "trait_value_id": "red", "bucket_filename": "red.png" },
                { "id": "l-blue", "trait_value_id": "blue", "bucket_filename": "blue.png" },
                { "id": "l-green", "trait_value_id": "green", "bucket_filename": "green.png" }
            ],
            "conflicts": [{
                "trait1_id": "a",
                "trait1_value_id": "red",
                "trait2_id": "b",
                "trait2_value_id": "green",
                "resolution_type": "randomize_first"
            }]
        }),
    );
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store.clone());

    let mut resolved = 0;
    for id in 0..16 {
        let result = engine
            .generate(&group(&format!("g{id}")), 0..1)
            .await
            .expect("generate");
        resolved += result.report.conflicts_resolved;
    }

    assert!(resolved >= 1);
    let stored = store.composites();
    assert_eq!(stored.len(), 16);
    for composite in &stored {
        assert_ne!(value_of(composite, "a"), Some("red"));
        for slot in &composite.traits {
            let expected = slot.trait_value_id.as_ref().map(|id| format!("l-{id}"));
            assert_eq!(slot.image_layer_id, expected);
        }
    }
}

#[tokio::test]
async fn companion_layers_are_staged_and_drawn() {
    let staging = StagingRoot::new("companion");
    // Two combinations exist, so both furs appear in a two-item batch.
    let catalog = catalog(
        3,
        json!({
            "traits": [
                { "id": "bg", "name": "Background", "z_index": 0 },
                { "id": "fur", "name": "Fur", "z_index": 1 }
            ],
            "trait_values": [
                { "id": "bg-red", "trait_id": "bg", "name": "Red", "rarity": 1.0 },
                { "id": "fur-black", "trait_id": "fur", "name": "Black", "rarity": 0.5 },
                { "id": "fur-white", "trait_id": "fur", "name": "White", "rarity": 0.5 }
            ],
            "image_layers": [
                { "id": "l-bg-red", "trait_value_id": "bg-red", "bucket_filename": "bg-red.png" },
                { "id": "l-fur-black", "trait_value_id": "fur-black", "bucket_filename": "fur-black.png" },
                {
                    "id": "l-fur-white",
                    "trait_value_id": "fur-white",
                    "bucket_filename": "fur-white.png",
                    "companion_layer_id": "l-tail",
                    "companion_layer_z_index": 5
                },
                { "id": "l-tail", "bucket_filename": "tail.png" }
            ]
        }),
    );
    let blobs = InMemoryBlobStore::new("https://cdn.example");
    blobs.insert("bg-red.png", png([255, 0, 0, 255]));
    blobs.insert("fur-black.png", png([0, 0, 0, 255]));
    blobs.insert("fur-white.png", png([255, 255, 255, 255]));
    let mut tail = RgbaImage::new(4, 4);
    tail.put_pixel(3, 3, Rgba([0, 255, 0, 255]));
    let mut tail_bytes = Vec::new();
    tail.write_to(&mut Cursor::new(&mut tail_bytes), ImageFormat::Png)
        .expect("encode tail");
    blobs.insert("tail.png", tail_bytes);
    let blobs = Arc::new(blobs);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs.clone(), store);

    // The batch stops short of the supply, so staging survives for inspection.
    let result = engine.generate(&run(), 0..2).await.expect("generate");
    assert_eq!(result.report.generated, 2);
    assert_eq!(result.report.asset_failures, 0);

    let tail_layer = catalog.layer_by_id("l-tail").expect("tail layer");
    let staged = StagingArea::new(staging.path(), "p").layer_path(tail_layer);
    assert!(staged.exists(), "{}", staged.display());

    let mut furs = BTreeSet::new();
    for composite in result.generated() {
        let fur = value_of(composite, "fur").expect("fur drawn");
        furs.insert(fur.to_string());
        let corner = uploaded_pixel(&blobs, composite.index, 3, 3).await;
        if fur == "fur-white" {
            assert_eq!(corner, [0, 255, 0, 255]);
            assert_eq!(
                uploaded_pixel(&blobs, composite.index, 1, 1).await,
                [255, 255, 255, 255]
            );
        } else {
            assert_eq!(corner[3], 0);
        }
    }
    assert_eq!(furs.len(), 2);
}

#[tokio::test]
async fn layers_with_look_alike_ids_render_their_own_pixels() {
    let staging = StagingRoot::new("look_alike");
    let catalog = catalog(
        2,
        json!({
            "traits": [{ "id": "name", "name": "Name", "z_index": 0, "is_always_unique": true }],
            "trait_values": [
                { "id": "red", "trait_id": "name", "name": "Red" },
                { "id": "blue", "trait_id": "name", "name": "Blue" }
            ],
            "image_layers": [
                { "id": "l:1", "trait_value_id": "red", "bucket_filename": "red.png" },
                { "id": "l_1", "trait_value_id": "blue", "bucket_filename": "blue.png" }
            ]
        }),
    );
    let blobs = InMemoryBlobStore::new("https://cdn.example");
    blobs.insert("red.png", png([255, 0, 0, 255]));
    blobs.insert("blue.png", png([0, 0, 255, 255]));
    let blobs = Arc::new(blobs);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs.clone(), store);

    let result = engine.generate(&run(), 0..2).await.expect("generate");
    assert_eq!(result.report.generated, 2);

    for composite in result.generated() {
        let expected = match value_of(composite, "name") {
            Some("red") => [255, 0, 0, 255],
            Some("blue") => [0, 0, 255, 255],
            other => panic!("unexpected name {other:?}"),
        };
        assert_eq!(uploaded_pixel(&blobs, composite.index, 1, 1).await, expected);
    }
}

#[tokio::test]
async fn missing_asset_degrades_to_an_empty_layer() {
    let staging = StagingRoot::new("missing_asset");
    let catalog = varied(6);
    let blobs = InMemoryBlobStore::new("https://cdn.example");
    for layer in &catalog.image_layers {
        if layer.id != "l-tail" {
            blobs.insert(&layer.bucket_filename, png([0, 0, 255, 255]));
        }
    }
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, Arc::new(blobs), store);

    let result = engine.generate(&run(), 0..6).await.expect("generate");

    assert_eq!(result.report.asset_failures, 1);
    assert_eq!(result.report.composite_failures, 0);
    assert_eq!(result.report.issues_by_code.get("asset_fetch_failed"), Some(&1));
    assert_eq!(
        result.report.generated + result.report.abandoned,
        result.report.requested
    );
}

struct RejectingUploads {
    inner: InMemoryBlobStore,
}

#[async_trait]
impl BlobStore for RejectingUploads {
    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(path).await
    }

    async fn put(
        &self,
        _path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        Err(StorageError::Backend("bucket is read-only".to_string()))
    }
}

#[tokio::test]
async fn failed_upload_still_records_the_composite() {
    let catalog = single_background(1);
    let inner = InMemoryBlobStore::new("https://cdn.example");
    inner.insert("red.png", png([255, 0, 0, 255]));
    let store = Arc::new(InMemoryCompositeStore::new());
    let staging = StagingRoot::new("upload");
    let engine = engine(
        &staging,
        &catalog,
        Arc::new(RejectingUploads { inner }),
        store.clone(),
    );

    let result = engine.generate(&run(), 0..1).await.expect("generate");

    let composite = result.composites[0].as_ref().expect("composite recorded");
    assert_eq!(composite.image_url, None);
    assert_eq!(result.report.upload_failures, 1);
    assert_eq!(store.composites().len(), 1);
}

#[tokio::test]
async fn uploads_carry_the_configured_content_type() {
    let staging = StagingRoot::new("content_type");
    let catalog = single_background(1);
    let blobs = blobs_for(&catalog);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs.clone(), store);

    engine.generate(&run(), 0..1).await.expect("generate");

    assert_eq!(blobs.content_type("p/c/g1/0.png").as_deref(), Some("image/png"));
}

#[tokio::test]
async fn composite_without_any_layer_yields_none() {
    let staging = StagingRoot::new("no_layers");
    let catalog = catalog(
        1,
        json!({
            "traits": [{ "id": "bg", "name": "Background", "z_index": 0 }],
            "trait_values": [{ "id": "red", "trait_id": "bg", "name": "Red", "rarity": 1.0 }],
            "image_layers": [{ "id": "l-red", "trait_value_id": "red", "bucket_filename": "red.png" }]
        }),
    );
    let blobs = Arc::new(InMemoryBlobStore::new("https://cdn.example"));
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs, store.clone());

    let result = engine.generate(&run(), 0..1).await.expect("generate");

    assert_eq!(result.composites, vec![None]);
    assert_eq!(result.report.composite_failures, 1);
    assert!(store.composites().is_empty());
}

struct BrokenCompositor;

impl Compositor for BrokenCompositor {
    fn composite(&self, _layers: &[Option<PathBuf>], _output: &Path) -> Result<(), CompositeError> {
        Err(CompositeError::Task("renderer offline".to_string()))
    }
}

#[tokio::test]
async fn compositor_failure_skips_the_item_and_keeps_the_combination_free() {
    let staging = StagingRoot::new("broken");
    let catalog = single_background(2);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store.clone())
        .with_compositor(Arc::new(BrokenCompositor));

    let result = engine.generate(&run(), 0..2).await.expect("generate");

    // Nothing was persisted, so the only combination is drawn again for index 1.
    assert_eq!(result.composites, vec![None, None]);
    assert_eq!(result.report.composite_failures, 2);
    assert_eq!(result.report.abandoned, 0);
    assert!(store.composites().is_empty());
}

#[tokio::test]
async fn empty_scope_produces_nothing() {
    let staging = StagingRoot::new("empty");
    let catalog = catalog(
        2,
        json!({
            "traits": [{ "id": "bg", "name": "Background", "z_index": 0 }],
            "trait_values": [{ "id": "red", "trait_id": "bg", "name": "Red", "rarity": 1.0 }]
        }),
    );
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store);

    let result = engine.generate(&run(), 0..2).await.expect("generate");
    assert!(result.composites.is_empty());
    assert_eq!(result.report.generated, 0);
}

#[tokio::test]
async fn invalid_ranges_are_rejected() {
    let staging = StagingRoot::new("ranges");
    let catalog = single_background(3);
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store);

    assert!(matches!(
        engine.generate(&run(), 0..4).await,
        Err(GenerationError::InvalidRun(_))
    ));

    let mut scoped = run();
    scoped.trait_set_id = Some("nope".to_string());
    assert!(matches!(
        engine.generate(&scoped, 0..1).await,
        Err(GenerationError::InvalidRun(_))
    ));
}

#[tokio::test]
async fn staging_is_removed_only_after_the_final_batch() {
    let catalog = varied(4);
    let store = Arc::new(InMemoryCompositeStore::new());
    let blobs = blobs_for(&catalog);
    let staging = StagingRoot::new("staging");
    let engine = engine(&staging, &catalog, blobs, store);

    engine.generate(&run(), 0..2).await.expect("first batch");
    assert!(staging.path().join("p").join("layers").exists());

    engine.generate(&run(), 2..4).await.expect("final batch");
    assert!(!staging.path().join("p").exists());
}

#[tokio::test]
async fn seeded_runs_are_deterministic() {
    let staging_seed_a = StagingRoot::new("seed_a");
    let staging_seed_b = StagingRoot::new("seed_b");
    let catalog = varied(8);

    let store_a = Arc::new(InMemoryCompositeStore::new());
    let result_a = engine(&staging_seed_a, &catalog, blobs_for(&catalog), store_a)
        .generate(&run(), 0..8)
        .await
        .expect("run A");
    let store_b = Arc::new(InMemoryCompositeStore::new());
    let result_b = engine(&staging_seed_b, &catalog, blobs_for(&catalog), store_b)
        .generate(&run(), 0..8)
        .await
        .expect("run B");

    let hashes = |composites: &[Option<ImageComposite>]| -> Vec<Option<String>> {
        composites
            .iter()
            .map(|c| c.as_ref().map(|c| c.traits_hash.clone()))
            .collect()
    };
    assert_eq!(hashes(&result_a.composites), hashes(&result_b.composites));
}

#[tokio::test]
async fn trait_set_runs_use_only_their_traits() {
    let staging = StagingRoot::new("trait_set");
    let catalog = catalog(
        4,
        json!({
            "collection": {
                "id": "c",
                "name": "Test",
                "supply": 4,
                "trait_sets": [{ "id": "royal", "name": "Royal", "start_index": 2, "end_index": 4 }]
            },
            "traits": [
                { "id": "bg", "name": "Background", "z_index": 0 },
                { "id": "crown", "name": "Crown", "z_index": 1, "trait_set_id": "royal" }
            ],
            "trait_values": [
                { "id": "red", "trait_id": "bg", "name": "Red", "rarity": 1.0 },
                { "id": "gold", "trait_id": "crown", "name": "Gold", "rarity": 0.5 },
                { "id": "silver", "trait_id": "crown", "name": "Silver", "rarity": 0.5 }
            ],
            "image_layers": [
                { "id": "l-red", "trait_value_id": "red", "bucket_filename": "red.png" },
                { "id": "l-gold", "trait_value_id": "gold", "bucket_filename": "gold.png" },
                { "id": "l-silver", "trait_value_id": "silver", "bucket_filename": "silver.png" }
            ]
        }),
    );
    let store = Arc::new(InMemoryCompositeStore::new());
    let engine = engine(&staging, &catalog, blobs_for(&catalog), store.clone());

    let mut royal = run();
    royal.trait_set_id = Some("royal".to_string());
    let result = engine.generate(&royal, 2..4).await.expect("generate");

    assert_eq!(result.report.generated, 2);
    for composite in result.generated() {
        assert_eq!(composite.traits.len(), 1);
        assert_eq!(composite.trait_set_id.as_deref(), Some("royal"));
        assert!(value_of(composite, "crown").is_some());
    }
    assert!(matches!(
        engine.generate(&royal, 0..2).await,
        Err(GenerationError::InvalidRun(_))
    ));
    assert!(store.composites().iter().all(|c| c.index >= 2));
}
