use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use mintforge_core::{Catalog, ImageComposite, ImageLayer};

use crate::compositor::{Compositor, ImageCompositor};
use crate::conflicts::{ConflictResolution, ConflictResolver};
use crate::draw::{Draw, TraitValuePair, ValuePools};
use crate::errors::{CompositeError, GenerationError, StorageError};
use crate::layers::{LayerPlanner, attach_layers};
use crate::model::{GenerateOptions, GenerationIssue, GenerationReport};
use crate::sampler::RaritySampler;
use crate::staging::StagingArea;
use crate::storage::{BlobStore, CatalogReader, CompositeScope, CompositeStore};
use crate::uniqueness::{UniquenessRegistry, fingerprint};

/// Identifies one generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDescriptor {
    pub project_id: String,
    pub collection_id: String,
    /// Uniqueness scope shared by every batch of the run.
    pub composite_group_id: String,
    pub trait_set_id: Option<String>,
}

impl RunDescriptor {
    pub fn scope(&self) -> CompositeScope {
        CompositeScope {
            project_id: self.project_id.clone(),
            collection_id: self.collection_id.clone(),
            composite_group_id: self.composite_group_id.clone(),
        }
    }
}

/// Output of one batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// One entry per index of the batch, in index order. `None` marks an index
    /// that was abandoned or failed to render.
    pub composites: Vec<Option<ImageComposite>>,
    pub report: GenerationReport,
}

impl BatchResult {
    pub fn generated(&self) -> impl Iterator<Item = &ImageComposite> {
        self.composites.iter().flatten()
    }
}

/// Drives item generation for contiguous index batches of a run.
pub struct GenerationEngine {
    options: GenerateOptions,
    catalogs: Arc<dyn CatalogReader>,
    blobs: Arc<dyn BlobStore>,
    composites: Arc<dyn CompositeStore>,
    compositor: Arc<dyn Compositor>,
}

impl GenerationEngine {
    pub fn new(
        options: GenerateOptions,
        catalogs: Arc<dyn CatalogReader>,
        blobs: Arc<dyn BlobStore>,
        composites: Arc<dyn CompositeStore>,
    ) -> Self {
        Self {
            options,
            catalogs,
            blobs,
            composites,
            compositor: Arc::new(ImageCompositor),
        }
    }

    pub fn with_compositor(mut self, compositor: Arc<dyn Compositor>) -> Self {
        self.compositor = compositor;
        self
    }

    /// Generate the items of `range` for a run.
    ///
    /// Items are produced strictly in index order. Per-item failures are
    /// logged and reported, never returned: the caller gets whatever could be
    /// produced and must check for `None` entries. Only an invalid range or an
    /// unreadable catalog fails the batch.
    pub async fn generate(
        &self,
        run: &RunDescriptor,
        range: Range<u64>,
    ) -> Result<BatchResult, GenerationError> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut report = GenerationReport::new(
            run_id.clone(),
            run.composite_group_id.clone(),
            range.start,
            range.end,
        );

        let full = self
            .catalogs
            .load_catalog(&run.project_id, &run.collection_id)
            .await?;
        let supply = full.collection.supply;
        let first_of_set = validate_range(&full, run, &range)?;
        let catalog = full.scoped(run.trait_set_id.as_deref())?;

        info!(
            run_id = %run_id,
            group = %run.composite_group_id,
            trait_set = run.trait_set_id.as_deref().unwrap_or("-"),
            start = range.start,
            end = range.end,
            supply,
            "batch started"
        );

        if catalog.traits.is_empty()
            || catalog.trait_values.is_empty()
            || catalog.image_layers.is_empty()
        {
            info!(
                run_id = %run_id,
                traits = catalog.traits.len(),
                trait_values = catalog.trait_values.len(),
                image_layers = catalog.image_layers.len(),
                "nothing to generate for this scope"
            );
            report.duration_ms = start.elapsed().as_millis() as u64;
            return Ok(BatchResult {
                composites: Vec::new(),
                report,
            });
        }

        let staging = StagingArea::new(&self.options.staging_root, &run.project_id);
        let staged_ready = if range.start == 0 {
            staging.prepare().await
        } else {
            staging.ensure().await
        };
        if let Err(err) = staged_ready {
            warn!(path = %staging.root().display(), error = %err, "staging setup failed");
            report.record_issue(GenerationIssue::warning(
                "staging_setup_failed",
                format!("{}: {err}", staging.root().display()),
            ));
        }

        let staged = self
            .prefetch(&catalog.image_layers, &staging, first_of_set, &mut report)
            .await;

        let scope = run.scope();
        let mut pools = ValuePools::from_catalog(&catalog);
        match self.composites.consumed_trait_values(&scope).await {
            Ok(consumed) => {
                let removed = pools.exclude_consumed(&catalog.traits, &consumed);
                debug!(removed, "always-unique values consumed by earlier batches");
            }
            Err(err) => {
                warn!(error = %err, "could not load consumed trait values");
                report.record_issue(GenerationIssue::warning(
                    "consumed_values_unavailable",
                    err.to_string(),
                ));
            }
        }

        let sampler = RaritySampler::new(
            self.options.rarity_precision,
            self.options.max_exclusion_attempts,
        );
        let mut ctx = BatchContext {
            catalog: &catalog,
            pools,
            registry: UniquenessRegistry::new(Arc::clone(&self.composites), scope),
            sampler,
            resolver: ConflictResolver::new(&catalog.conflicts, sampler),
            rng: self.batch_rng(run, range.start)?,
        };
        let planner = LayerPlanner::new(&catalog.image_layers);

        let mut results = Vec::with_capacity(report.requested as usize);
        for index in range.clone() {
            let outcome = ctx.find_unique_draw(self.options.max_draw_attempts).await;
            let unique = match outcome {
                DrawOutcome::Unique(unique) => unique,
                DrawOutcome::Exhausted { attempts } => {
                    report.draw_attempts += u64::from(attempts);
                    report.abandoned += 1;
                    warn!(index, attempts, "no unused combination found; index abandoned");
                    report.record_issue(
                        GenerationIssue::warning(
                            "sampling_exhausted",
                            format!("no unused combination after {attempts} attempts"),
                        )
                        .at_index(index),
                    );
                    results.push(None);
                    continue;
                }
            };
            report.draw_attempts += u64::from(unique.attempts);
            report.conflicts_resolved += unique.resolutions.len() as u64;
            for resolution in &unique.resolutions {
                info!(
                    index,
                    trait_name = %resolution.trait_name,
                    old_value = resolution.old_value.as_deref().unwrap_or("-"),
                    new_value = resolution.new_value.as_deref().unwrap_or("-"),
                    against = %resolution.against_trait,
                    "conflict resolved"
                );
            }

            let mut draw = unique.draw;
            attach_layers(&mut draw, &catalog);
            let planned = planner.plan(draw.pairs());
            let layer_paths: Vec<Option<PathBuf>> = planned
                .iter()
                .map(|entry| {
                    entry
                        .layer
                        .as_ref()
                        .and_then(|layer| staged.get(&layer.id).cloned())
                })
                .collect();

            let output = staging.output_path(
                &run.composite_group_id,
                index,
                &self.options.output_extension,
            );
            let bytes = match self.render(layer_paths, output).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    report.composite_failures += 1;
                    warn!(index, error = %err, "composite failed");
                    report.record_issue(
                        GenerationIssue::warning("composite_failed", err.to_string())
                            .at_index(index),
                    );
                    results.push(None);
                    continue;
                }
            };

            let upload_path = format!(
                "{}/{}/{}/{index}.{}",
                run.project_id,
                run.collection_id,
                run.composite_group_id,
                self.options.output_extension
            );
            let image_url = match self
                .blobs
                .put(&upload_path, bytes, &self.options.content_type)
                .await
            {
                Ok(url) => Some(url),
                Err(err) => {
                    report.upload_failures += 1;
                    warn!(index, path = %upload_path, error = %err, "upload failed");
                    report.record_issue(
                        GenerationIssue::warning("upload_failed", err.to_string()).at_index(index),
                    );
                    None
                }
            };

            let composite = ImageComposite {
                id: uuid::Uuid::new_v4().to_string(),
                project_id: run.project_id.clone(),
                collection_id: run.collection_id.clone(),
                composite_group_id: run.composite_group_id.clone(),
                trait_set_id: run.trait_set_id.clone(),
                index,
                traits: draw
                    .pairs()
                    .iter()
                    .map(TraitValuePair::to_composite_trait)
                    .collect(),
                traits_hash: unique.resolved_hash.clone(),
                image_url,
                created_at: Utc::now(),
            };
            if let Err(err) = self.composites.create(composite.clone()).await {
                report.persist_failures += 1;
                warn!(index, error = %err, "composite could not be persisted");
                report.record_issue(
                    GenerationIssue::warning("persist_failed", err.to_string()).at_index(index),
                );
                results.push(None);
                continue;
            }

            ctx.registry
                .commit([unique.base_hash.as_str(), unique.resolved_hash.as_str()]);
            ctx.pools.consume(&draw);
            report.generated += 1;
            debug!(
                index,
                traits_hash = %composite.traits_hash,
                attempts = unique.attempts,
                "composite generated"
            );
            results.push(Some(composite));
        }

        if range.end == supply {
            match staging.teardown().await {
                Ok(()) => debug!(path = %staging.root().display(), "staging removed"),
                Err(err) => {
                    warn!(path = %staging.root().display(), error = %err, "staging cleanup failed");
                    report.record_issue(GenerationIssue::warning(
                        "staging_cleanup_failed",
                        err.to_string(),
                    ));
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            requested = report.requested,
            generated = report.generated,
            abandoned = report.abandoned,
            duration_ms = report.duration_ms,
            "batch finished"
        );

        Ok(BatchResult {
            composites: results,
            report,
        })
    }

    /// Download every distinct layer of the scope concurrently.
    ///
    /// On the first batch of a trait set each layer is fetched again; later
    /// batches only fetch layers missing from staging. A failed layer is left
    /// out of the returned map and renders as an empty slot.
    async fn prefetch(
        &self,
        layers: &[ImageLayer],
        staging: &StagingArea,
        refresh: bool,
        report: &mut GenerationReport,
    ) -> HashMap<String, PathBuf> {
        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();
        for layer in layers {
            if !seen.insert(layer.id.as_str()) {
                continue;
            }
            let blobs = Arc::clone(&self.blobs);
            let path = staging.layer_path(layer);
            let layer = layer.clone();
            tasks.spawn(async move {
                let fetched = fetch_layer(blobs.as_ref(), &layer, &path, refresh).await;
                (layer, path, fetched)
            });
        }

        let mut staged = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((layer, path, Ok(()))) => {
                    staged.insert(layer.id, path);
                }
                Ok((layer, _, Err(err))) => {
                    report.asset_failures += 1;
                    warn!(
                        layer_id = %layer.id,
                        path = %layer.bucket_filename,
                        error = %err,
                        "layer fetch failed"
                    );
                    report.record_issue(
                        GenerationIssue::warning("asset_fetch_failed", err.to_string())
                            .for_layer(&layer.id),
                    );
                }
                Err(err) => {
                    report.asset_failures += 1;
                    warn!(error = %err, "layer fetch task failed");
                    report.record_issue(GenerationIssue::warning(
                        "asset_fetch_failed",
                        err.to_string(),
                    ));
                }
            }
        }
        debug!(staged = staged.len(), refresh, "layers staged");
        staged
    }

    async fn render(
        &self,
        layers: Vec<Option<PathBuf>>,
        output: PathBuf,
    ) -> Result<Vec<u8>, CompositeError> {
        let compositor = Arc::clone(&self.compositor);
        let target = output.clone();
        tokio::task::spawn_blocking(move || compositor.composite(&layers, &target))
            .await
            .map_err(|err| CompositeError::Task(err.to_string()))??;
        Ok(tokio::fs::read(&output).await?)
    }

    fn batch_rng(&self, run: &RunDescriptor, start: u64) -> Result<ChaCha20Rng, GenerationError> {
        match self.options.seed {
            Some(seed) => Ok(ChaCha20Rng::seed_from_u64(hash_seed(
                seed,
                &format!("{}.{start}", run.composite_group_id),
            ))),
            None => ChaCha20Rng::try_from_os_rng()
                .map_err(|err| GenerationError::Entropy(err.to_string())),
        }
    }
}

/// Mutable state shared by consecutive items of one batch.
struct BatchContext<'a> {
    catalog: &'a Catalog,
    pools: ValuePools,
    registry: UniquenessRegistry,
    sampler: RaritySampler,
    resolver: ConflictResolver<'a>,
    rng: ChaCha20Rng,
}

struct UniqueDraw {
    draw: Draw,
    base_hash: String,
    resolved_hash: String,
    attempts: u32,
    resolutions: Vec<ConflictResolution>,
}

enum DrawOutcome {
    Unique(UniqueDraw),
    Exhausted { attempts: u32 },
}

enum DrawState {
    Sampling { attempt: u32 },
    Settled(DrawOutcome),
}

impl BatchContext<'_> {
    /// Draw until an unused combination is found or the attempt budget runs out.
    async fn find_unique_draw(&mut self, max_attempts: u32) -> DrawOutcome {
        let mut state = DrawState::Sampling { attempt: 1 };
        loop {
            state = match state {
                DrawState::Sampling { attempt } if attempt > max_attempts => {
                    DrawState::Settled(DrawOutcome::Exhausted {
                        attempts: max_attempts,
                    })
                }
                DrawState::Sampling { attempt } => self.attempt(attempt).await,
                DrawState::Settled(outcome) => return outcome,
            };
        }
    }

    async fn attempt(&mut self, attempt: u32) -> DrawState {
        let mut draw = self.draw_combination();
        let base_hash = fingerprint(draw.pairs());
        if !self.registry.is_available(&base_hash).await {
            return DrawState::Sampling {
                attempt: attempt + 1,
            };
        }

        let resolutions = self.resolver.resolve(&mut draw, &self.pools, &mut self.rng);
        let resolved_hash = if resolutions.is_empty() {
            base_hash.clone()
        } else {
            fingerprint(draw.pairs())
        };
        if resolved_hash != base_hash && !self.registry.is_available(&resolved_hash).await {
            return DrawState::Sampling {
                attempt: attempt + 1,
            };
        }

        DrawState::Settled(DrawOutcome::Unique(UniqueDraw {
            draw,
            base_hash,
            resolved_hash,
            attempts: attempt,
            resolutions,
        }))
    }

    fn draw_combination(&mut self) -> Draw {
        let pairs = self
            .catalog
            .traits
            .iter()
            .map(|trait_def| {
                let value = self
                    .sampler
                    .random_value(
                        self.pools.pool(&trait_def.id),
                        trait_def.is_always_unique,
                        None,
                        &mut self.rng,
                    )
                    .cloned();
                TraitValuePair::new(trait_def.clone(), value)
            })
            .collect();
        Draw::new(pairs)
    }
}

fn validate_range(
    catalog: &Catalog,
    run: &RunDescriptor,
    range: &Range<u64>,
) -> Result<bool, GenerationError> {
    let supply = catalog.collection.supply;
    if range.start > range.end {
        return Err(GenerationError::InvalidRun(format!(
            "start index {} is after end index {}",
            range.start, range.end
        )));
    }
    if range.end > supply {
        return Err(GenerationError::InvalidRun(format!(
            "end index {} exceeds supply {supply}",
            range.end
        )));
    }

    let Some(set_id) = run.trait_set_id.as_deref() else {
        return Ok(range.start == 0);
    };
    let set = catalog
        .trait_set(set_id)
        .ok_or_else(|| GenerationError::InvalidRun(format!("unknown trait set '{set_id}'")))?;
    if range.start < set.start_index || range.end > set.end_index {
        return Err(GenerationError::InvalidRun(format!(
            "range [{}, {}) lies outside trait set '{set_id}' [{}, {})",
            range.start, range.end, set.start_index, set.end_index
        )));
    }
    Ok(range.start == set.start_index)
}

async fn fetch_layer(
    blobs: &dyn BlobStore,
    layer: &ImageLayer,
    path: &Path,
    refresh: bool,
) -> Result<(), StorageError> {
    if !refresh && tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    let bytes = blobs.get(&layer.bucket_filename).await?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

fn hash_seed(seed: u64, key: &str) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
