//! Harvest orchestration: the reconciliation engine that classifies every
//! remote record as new/changed/delete across runs, and the import driver
//! that commits one classified work item to the target catalog.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use dch_core::{CatalogRecord, DcatDataset, HarvestObject, ObjectStatus};
use dch_fetch::{FetchConfig, Page, PageSource};
use dch_formats::{
    format_for, DatasetFormat, DiscardFilter, Extracted, ParseError, RdfSyntax, SourceFormat,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod convert;

pub use convert::{catalog_to_dcat, dcat_to_catalog, parse_byte_size, ConvertError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("conversion failed for {guid}: {message}")]
    Conversion { guid: String, message: String },
    #[error("could not derive a unique catalog name from title '{title}'")]
    NameCollision { title: String },
    #[error("work item {id} has no content to import")]
    EmptyContent { id: Uuid },
    #[error("work item {id} has no catalog record key")]
    MissingRecordKey { id: Uuid },
    #[error("record transform hook failed for {guid}: {message}")]
    Transform { guid: String, message: String },
    #[error("harvest store error: {0}")]
    Store(String),
    #[error("catalog error: {0}")]
    Catalog(String),
}

/// Identifier index the engine diffs against: guid to catalog record key for
/// every object currently flagged authoritative, plus the durable flag flip.
/// Two concurrent runs of the same source must be kept apart by the store's
/// own transactional isolation; the engine does not arbitrate that.
pub trait HarvestStore: Send + Sync {
    fn current_records(&self, source_id: &str) -> anyhow::Result<HashMap<String, String>>;
    fn get(&self, id: Uuid) -> anyhow::Result<Option<HarvestObject>>;
    /// Upsert by object id.
    fn save(&mut self, object: &HarvestObject) -> anyhow::Result<()>;
    /// Flip `current` off for every object of this identifier.
    fn mark_superseded(&mut self, source_id: &str, guid: &str) -> anyhow::Result<()>;
}

/// Create/update/delete entry points of the target catalog, keyed by a
/// generated or existing record key.
pub trait CatalogApi: Send + Sync {
    fn create(&mut self, record: &CatalogRecord) -> anyhow::Result<String>;
    fn update(&mut self, record: &CatalogRecord) -> anyhow::Result<String>;
    fn delete(&mut self, record_id: &str) -> anyhow::Result<()>;
    fn is_name_taken(&self, name: &str) -> anyhow::Result<bool>;
}

/// License registry lookups: exact URL match, case-insensitive title match.
pub trait LicenseRegistry: Send + Sync {
    fn id_for_url(&self, url: &str) -> Option<String>;
    fn id_for_title(&self, title: &str) -> Option<String>;
}

/// Caller-supplied transform applied to the target record just before
/// commit.
pub trait RecordTransform: Send + Sync {
    fn apply(
        &self,
        record: CatalogRecord,
        dataset: &DcatDataset,
        object: &HarvestObject,
    ) -> anyhow::Result<CatalogRecord>;
}

#[derive(Debug, Default)]
pub struct NoopTransform;

impl RecordTransform for NoopTransform {
    fn apply(
        &self,
        record: CatalogRecord,
        _dataset: &DcatDataset,
        _object: &HarvestObject,
    ) -> anyhow::Result<CatalogRecord> {
        Ok(record)
    }
}

/// Explicit per-run options; nothing run-scoped lives on the harvester
/// itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Re-import objects that already have a catalog record even when the
    /// engine classified nothing as changed.
    pub force_import: bool,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub max_bytes: u64,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub allowed_encodings: Vec<String>,
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self {
            max_bytes: std::env::var("HARVEST_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50 * 1024 * 1024),
            http_timeout_secs: std::env::var("HARVEST_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            user_agent: std::env::var("HARVEST_USER_AGENT")
                .unwrap_or_else(|_| "dch-harvester/0.1".to_string()),
            allowed_encodings: std::env::var("HARVEST_ALLOWED_ENCODINGS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            max_bytes: self.max_bytes,
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            allowed_encodings: self.allowed_encodings.clone(),
            ..FetchConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub format: SourceFormat,
    #[serde(default)]
    pub rdf_syntax: RdfSyntax,
    #[serde(default)]
    pub discard: DiscardFilter,
}

impl SourceConfig {
    pub fn dataset_format(&self) -> Box<dyn DatasetFormat> {
        format_for(self.format, self.rdf_syntax, self.discard.clone())
    }
}

/// What one gather pass produced: persisted work item ids, classification
/// tallies and any reported errors. A non-empty error list means the run
/// aborted and the work list must not be imported, because the identifier
/// set is incomplete and deletes could not be derived safely.
#[derive(Debug, Default)]
pub struct GatherOutcome {
    pub run_id: Uuid,
    pub object_ids: Vec<Uuid>,
    pub new: usize,
    pub changed: usize,
    pub deleted: usize,
    pub errors: Vec<String>,
}

impl GatherOutcome {
    pub fn aborted(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Drives fetcher and parser across pages and diffs the observed identifier
/// set against the prior snapshot.
pub struct Harvester<'a> {
    source: &'a SourceConfig,
    format: &'a dyn DatasetFormat,
    fetcher: &'a dyn PageSource,
    store: &'a mut dyn HarvestStore,
}

impl<'a> Harvester<'a> {
    pub fn new(
        source: &'a SourceConfig,
        format: &'a dyn DatasetFormat,
        fetcher: &'a dyn PageSource,
        store: &'a mut dyn HarvestStore,
    ) -> Self {
        Self {
            source,
            format,
            fetcher,
            store,
        }
    }

    pub async fn gather(&mut self) -> GatherOutcome {
        let mut outcome = GatherOutcome {
            run_id: Uuid::new_v4(),
            ..GatherOutcome::default()
        };

        let prior = match self.store.current_records(&self.source.source_id) {
            Ok(prior) => prior,
            Err(err) => {
                outcome
                    .errors
                    .push(format!("could not load prior snapshot: {err}"));
                return outcome;
            }
        };
        debug!(
            source_id = %self.source.source_id,
            prior = prior.len(),
            "gather starting"
        );

        let mut seen: HashSet<String> = HashSet::new();
        let mut previous: Vec<u8> = Vec::new();
        let mut page: u32 = 1;

        loop {
            let content = match self.fetcher.fetch_page(&self.source.url, page).await {
                Ok(Page::Content(content)) => content,
                Ok(Page::NoMorePages) => {
                    debug!(page, "404 past the first page, no more pages");
                    break;
                }
                Err(err) => {
                    outcome
                        .errors
                        .push(format!("could not get content for page {page}: {err}"));
                    return outcome;
                }
            };
            if content.is_empty() {
                debug!(page, "empty response, no more pages");
                break;
            }
            if page > 1 && content == previous {
                // pagination unsupported or exhausted
                debug!(page, "same content as previous page, stopping");
                break;
            }

            let records = match self.format.split(&content) {
                Ok(records) => records,
                Err(err) => {
                    // the identifier set for this page is unknowable now, so
                    // a partial diff would be unsafe; abort the whole run
                    outcome
                        .errors
                        .push(format!("error parsing page {page}: {err}"));
                    return outcome;
                }
            };
            if records.is_empty() {
                debug!(page, "empty document, no more records");
                break;
            }

            for record in records {
                debug!(guid = %record.guid, "got identifier");
                let status = if prior.contains_key(&record.guid) {
                    outcome.changed += 1;
                    ObjectStatus::Changed
                } else {
                    outcome.new += 1;
                    ObjectStatus::New
                };
                let mut object =
                    HarvestObject::new(&self.source.source_id, &record.guid, status);
                object.content = Some(record.fragment);
                object.record_id = prior.get(&record.guid).cloned();
                if let Err(err) = self.store.save(&object) {
                    outcome
                        .errors
                        .push(format!("could not persist work item for {}: {err}", record.guid));
                    return outcome;
                }
                seen.insert(record.guid);
                outcome.object_ids.push(object.id);
            }

            previous = content;
            page += 1;
        }

        // anything in the prior snapshot the source no longer mentions
        let mut to_delete: Vec<(&String, &String)> = prior
            .iter()
            .filter(|(guid, _)| !seen.contains(*guid))
            .collect();
        to_delete.sort();
        for (guid, record_id) in to_delete {
            let mut object =
                HarvestObject::new(&self.source.source_id, guid, ObjectStatus::Delete);
            object.record_id = Some(record_id.clone());
            // flip the old object off right away so a crash between here and
            // the catalog delete cannot re-process it as still current
            if let Err(err) = self.store.mark_superseded(&self.source.source_id, guid) {
                outcome
                    .errors
                    .push(format!("could not supersede {guid}: {err}"));
                return outcome;
            }
            if let Err(err) = self.store.save(&object) {
                outcome
                    .errors
                    .push(format!("could not persist delete item for {guid}: {err}"));
                return outcome;
            }
            outcome.deleted += 1;
            outcome.object_ids.push(object.id);
        }

        info!(
            source_id = %self.source.source_id,
            new = outcome.new,
            changed = outcome.changed,
            deleted = outcome.deleted,
            "gather finished"
        );
        outcome
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Created(String),
    Updated(String),
    Deleted(String),
    /// Extraction reported a deliberate skip; treated as success with no
    /// catalog mutation.
    Skipped(String),
}

/// Consumes one classified work item and commits the corresponding catalog
/// mutation.
pub struct Importer<'a> {
    format: &'a dyn DatasetFormat,
    store: &'a mut dyn HarvestStore,
    catalog: &'a mut dyn CatalogApi,
    licenses: &'a dyn LicenseRegistry,
    transform: &'a dyn RecordTransform,
}

impl<'a> Importer<'a> {
    pub fn new(
        format: &'a dyn DatasetFormat,
        store: &'a mut dyn HarvestStore,
        catalog: &'a mut dyn CatalogApi,
        licenses: &'a dyn LicenseRegistry,
        transform: &'a dyn RecordTransform,
    ) -> Self {
        Self {
            format,
            store,
            catalog,
            licenses,
            transform,
        }
    }

    pub fn import_object(
        &mut self,
        object: &mut HarvestObject,
        options: &RunOptions,
    ) -> Result<ImportOutcome, SyncError> {
        if object.status == ObjectStatus::Delete {
            let record_id = object
                .record_id
                .clone()
                .ok_or(SyncError::MissingRecordKey { id: object.id })?;
            self.catalog
                .delete(&record_id)
                .map_err(|e| SyncError::Catalog(e.to_string()))?;
            info!(guid = %object.guid, record_id = %record_id, "deleted catalog record");
            return Ok(ImportOutcome::Deleted(record_id));
        }

        let content = object
            .content
            .as_deref()
            .ok_or(SyncError::EmptyContent { id: object.id })?;
        let dataset = match self.format.extract(content)? {
            Extracted::Ignored(reason) => {
                info!(guid = %object.guid, %reason, "record skipped");
                return Ok(ImportOutcome::Skipped(reason));
            }
            Extracted::Record(dataset) => dataset,
        };

        let mut record =
            dcat_to_catalog(&dataset, self.licenses).map_err(|e| SyncError::Conversion {
                guid: object.guid.clone(),
                message: e.to_string(),
            })?;

        // a force run re-imports objects that already own a catalog record
        let treat_as_new = match object.status {
            ObjectStatus::New => !(options.force_import && object.record_id.is_some()),
            _ => false,
        };

        if treat_as_new {
            if record.name.is_none() {
                record.name = Some(self.unique_name(dataset.title.as_deref())?);
            }
            // the key is generated up front and saved on the work item so
            // the record can be cross-referenced before the create commits
            let record_id = Uuid::new_v4().to_string();
            record.id = Some(record_id.clone());
            object.record_id = Some(record_id.clone());
            self.store
                .save(object)
                .map_err(|e| SyncError::Store(e.to_string()))?;

            let record = self.apply_transform(record, &dataset, object)?;
            let created = self
                .catalog
                .create(&record)
                .map_err(|e| SyncError::Catalog(e.to_string()))?;
            self.mark_current(object)?;
            info!(guid = %object.guid, record_id = %created, "created catalog record");
            Ok(ImportOutcome::Created(created))
        } else {
            let record_id = object
                .record_id
                .clone()
                .ok_or(SyncError::MissingRecordKey { id: object.id })?;
            record.id = Some(record_id);
            let record = self.apply_transform(record, &dataset, object)?;
            let updated = self
                .catalog
                .update(&record)
                .map_err(|e| SyncError::Catalog(e.to_string()))?;
            self.mark_current(object)?;
            info!(guid = %object.guid, record_id = %updated, "updated catalog record");
            Ok(ImportOutcome::Updated(updated))
        }
    }

    fn apply_transform(
        &self,
        record: CatalogRecord,
        dataset: &DcatDataset,
        object: &HarvestObject,
    ) -> Result<CatalogRecord, SyncError> {
        self.transform
            .apply(record, dataset, object)
            .map_err(|e| SyncError::Transform {
                guid: object.guid.clone(),
                message: e.to_string(),
            })
    }

    /// Failures leave the prior current object untouched, so flipping flags
    /// happens only after the catalog commit went through.
    fn mark_current(&mut self, object: &mut HarvestObject) -> Result<(), SyncError> {
        self.store
            .mark_superseded(&object.source_id, &object.guid)
            .map_err(|e| SyncError::Store(e.to_string()))?;
        object.current = true;
        self.store
            .save(object)
            .map_err(|e| SyncError::Store(e.to_string()))?;
        Ok(())
    }

    fn unique_name(&self, title: Option<&str>) -> Result<String, SyncError> {
        let title = title.unwrap_or_default().trim();
        let base = slugify(title);
        if base.is_empty() {
            return Err(SyncError::NameCollision {
                title: title.to_string(),
            });
        }
        let taken = |name: &str| -> Result<bool, SyncError> {
            self.catalog
                .is_name_taken(name)
                .map_err(|e| SyncError::Catalog(e.to_string()))
        };
        if !taken(&base)? {
            return Ok(base);
        }
        for suffix in 2..=100 {
            let candidate = format!("{base}-{suffix}");
            if !taken(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(SyncError::NameCollision {
            title: title.to_string(),
        })
    }
}

/// Catalog-safe slug derived from a title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for ch in title.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    slug.chars().take(90).collect()
}

#[derive(Debug, Clone, Default)]
pub struct SourceRunSummary {
    pub source_id: String,
    pub run_id: Uuid,
    pub gathered: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Wires fetcher, store, catalog and hooks together for whole-source runs.
pub struct HarvestPipeline<'a> {
    pub fetcher: &'a dyn PageSource,
    pub store: &'a mut dyn HarvestStore,
    pub catalog: &'a mut dyn CatalogApi,
    pub licenses: &'a dyn LicenseRegistry,
    pub transform: &'a dyn RecordTransform,
    pub options: RunOptions,
}

impl HarvestPipeline<'_> {
    pub async fn run_source(
        &mut self,
        source: &SourceConfig,
    ) -> anyhow::Result<SourceRunSummary> {
        let format = source.dataset_format();
        let outcome = Harvester::new(source, format.as_ref(), self.fetcher, self.store)
            .gather()
            .await;

        let mut summary = SourceRunSummary {
            source_id: source.source_id.clone(),
            run_id: outcome.run_id,
            gathered: outcome.object_ids.len(),
            errors: outcome.errors.clone(),
            ..SourceRunSummary::default()
        };
        if outcome.aborted() {
            warn!(source_id = %source.source_id, errors = ?summary.errors, "gather aborted");
            return Ok(summary);
        }

        for id in &outcome.object_ids {
            let Some(mut object) = self
                .store
                .get(*id)
                .map_err(|e| anyhow::anyhow!("loading work item {id}: {e}"))?
            else {
                summary.errors.push(format!("work item {id} disappeared"));
                continue;
            };
            let result = Importer::new(
                format.as_ref(),
                self.store,
                self.catalog,
                self.licenses,
                self.transform,
            )
            .import_object(&mut object, &self.options);
            match result {
                Ok(ImportOutcome::Created(_)) => summary.created += 1,
                Ok(ImportOutcome::Updated(_)) => summary.updated += 1,
                Ok(ImportOutcome::Deleted(_)) => summary.deleted += 1,
                Ok(ImportOutcome::Skipped(_)) => summary.skipped += 1,
                Err(err) => {
                    // a single record failure leaves its prior current
                    // object in place so it is retried next run
                    warn!(guid = %object.guid, error = %err, "import failed");
                    summary
                        .errors
                        .push(format!("import error for {}: {err}", object.guid));
                }
            }
        }
        Ok(summary)
    }
}

/// In-memory harvest store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: HashMap<Uuid, HarvestObject>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn objects(&self) -> impl Iterator<Item = &HarvestObject> {
        self.objects.values()
    }
}

impl HarvestStore for MemoryStore {
    fn current_records(&self, source_id: &str) -> anyhow::Result<HashMap<String, String>> {
        Ok(self
            .objects
            .values()
            .filter(|o| o.source_id == source_id && o.current)
            .filter_map(|o| {
                o.record_id
                    .as_ref()
                    .map(|record_id| (o.guid.clone(), record_id.clone()))
            })
            .collect())
    }

    fn get(&self, id: Uuid) -> anyhow::Result<Option<HarvestObject>> {
        Ok(self.objects.get(&id).cloned())
    }

    fn save(&mut self, object: &HarvestObject) -> anyhow::Result<()> {
        self.objects.insert(object.id, object.clone());
        Ok(())
    }

    fn mark_superseded(&mut self, source_id: &str, guid: &str) -> anyhow::Result<()> {
        for object in self.objects.values_mut() {
            if object.source_id == source_id && object.guid == guid {
                object.current = false;
            }
        }
        Ok(())
    }
}

/// In-memory catalog, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: HashMap<String, CatalogRecord>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, record_id: &str) -> Option<&CatalogRecord> {
        self.records.get(record_id)
    }
}

impl CatalogApi for MemoryCatalog {
    fn create(&mut self, record: &CatalogRecord) -> anyhow::Result<String> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("create called without a record key"))?;
        self.records.insert(id.clone(), record.clone());
        Ok(id)
    }

    fn update(&mut self, record: &CatalogRecord) -> anyhow::Result<String> {
        let id = record
            .id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("update called without a record key"))?;
        let existing = self
            .records
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("no record with key {id}"))?;
        let mut merged = record.clone();
        if merged.name.is_none() {
            merged.name = existing.name.clone();
        }
        self.records.insert(id.clone(), merged);
        Ok(id)
    }

    fn delete(&mut self, record_id: &str) -> anyhow::Result<()> {
        self.records
            .remove(record_id)
            .map(|_| ())
            .ok_or_else(|| anyhow::anyhow!("no record with key {record_id}"))
    }

    fn is_name_taken(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self
            .records
            .values()
            .any(|record| record.name.as_deref() == Some(name)))
    }
}

/// In-memory license registry, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLicenses {
    licenses: Vec<(String, String, String)>,
}

impl MemoryLicenses {
    pub fn register(&mut self, id: &str, title: &str, url: &str) {
        self.licenses
            .push((id.to_string(), title.to_string(), url.to_string()));
    }
}

impl LicenseRegistry for MemoryLicenses {
    fn id_for_url(&self, url: &str) -> Option<String> {
        self.licenses
            .iter()
            .find(|(_, _, candidate)| candidate == url)
            .map(|(id, _, _)| id.clone())
    }

    fn id_for_title(&self, title: &str) -> Option<String> {
        self.licenses
            .iter()
            .find(|(_, candidate, _)| candidate.eq_ignore_ascii_case(title))
            .map(|(id, _, _)| id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dch_fetch::FetchError;

    /// Canned page source: one entry per page, `NoMorePages` afterwards.
    struct StaticPages {
        pages: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl PageSource for StaticPages {
        async fn fetch_page(&self, _url: &str, page: u32) -> Result<Page, FetchError> {
            match self.pages.get((page - 1) as usize) {
                Some(bytes) => Ok(Page::Content(bytes.clone())),
                None => Ok(Page::NoMorePages),
            }
        }
    }

    fn json_source() -> SourceConfig {
        SourceConfig {
            source_id: "test-source".to_string(),
            url: "http://example.org/data.json".to_string(),
            enabled: true,
            format: SourceFormat::Json,
            rdf_syntax: RdfSyntax::default(),
            discard: DiscardFilter::default(),
        }
    }

    fn json_page(ids: &[&str]) -> Vec<u8> {
        let datasets: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"identifier": "{id}", "title": "Dataset {id}", "publisher": "CO"}}"#
                )
            })
            .collect();
        format!(r#"{{"dataset": [{}]}}"#, datasets.join(",")).into_bytes()
    }

    async fn run(
        pages: Vec<Vec<u8>>,
        store: &mut MemoryStore,
        catalog: &mut MemoryCatalog,
        options: RunOptions,
    ) -> SourceRunSummary {
        let fetcher = StaticPages { pages };
        let licenses = MemoryLicenses::default();
        let transform = NoopTransform;
        let mut pipeline = HarvestPipeline {
            fetcher: &fetcher,
            store,
            catalog,
            licenses: &licenses,
            transform: &transform,
            options,
        };
        pipeline.run_source(&json_source()).await.unwrap()
    }

    #[tokio::test]
    async fn first_run_creates_second_run_updates() {
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();

        let first = run(
            vec![json_page(&["a"]), json_page(&["b"])],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        assert_eq!(first.created, 2);
        assert_eq!(first.updated, 0);
        assert_eq!(first.deleted, 0);
        assert!(first.errors.is_empty());
        assert_eq!(catalog.len(), 2);

        // identical remote content: everything classifies as changed
        let second = run(
            vec![json_page(&["a"]), json_page(&["b"])],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(second.deleted, 0);
        assert_eq!(catalog.len(), 2);
    }

    #[tokio::test]
    async fn vanished_identifiers_are_deleted() {
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();

        run(
            vec![json_page(&["a", "b", "c"])],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        assert_eq!(catalog.len(), 3);

        let second = run(
            vec![json_page(&["a", "b"])],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        assert_eq!(second.updated, 2);
        assert_eq!(second.deleted, 1);
        assert_eq!(catalog.len(), 2);

        // c's delete item flipped its old object off before the delete
        assert!(store
            .objects()
            .filter(|o| o.guid == "c")
            .all(|o| !o.current));
    }

    #[tokio::test]
    async fn byte_identical_page_ends_pagination() {
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();

        let page = json_page(&["a", "b"]);
        let summary = run(
            vec![page.clone(), page.clone()],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        // page 2 repeats page 1, so only page 1's records count
        assert_eq!(summary.gathered, 2);
        assert_eq!(summary.created, 2);
    }

    #[tokio::test]
    async fn parse_failure_aborts_the_whole_run() {
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();

        // seed a current record that would otherwise be deleted
        run(
            vec![json_page(&["a"])],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;

        let summary = run(
            vec![json_page(&["b"]), b"not json at all".to_vec()],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        assert!(!summary.errors.is_empty());
        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 0);
        // no delete may be derived from an incomplete identifier set
        assert_eq!(summary.deleted, 0);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported_not_panicked() {
        struct FailingSource;

        #[async_trait]
        impl PageSource for FailingSource {
            async fn fetch_page(&self, url: &str, _page: u32) -> Result<Page, FetchError> {
                Err(FetchError::HttpStatus {
                    status: 500,
                    url: url.to_string(),
                })
            }
        }

        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();
        let licenses = MemoryLicenses::default();
        let transform = NoopTransform;
        let mut pipeline = HarvestPipeline {
            fetcher: &FailingSource,
            store: &mut store,
            catalog: &mut catalog,
            licenses: &licenses,
            transform: &transform,
            options: RunOptions::default(),
        };
        let summary = pipeline.run_source(&json_source()).await.unwrap();
        assert_eq!(summary.gathered, 0);
        assert!(summary.errors[0].contains("500"));
    }

    #[tokio::test]
    async fn blocked_records_skip_without_failing_the_run() {
        let turtle = br#"
            @prefix dcat: <http://www.w3.org/ns/dcat#> .
            @prefix dct: <http://purl.org/dc/terms/> .
            <http://example.org/ds/kept> a dcat:Dataset ;
                dct:title "Kept" ;
                dct:subject <http://example.org/themes/housing> .
            <http://example.org/ds/blocked> a dcat:Dataset ;
                dct:title "Blocked" ;
                dct:subject <http://example.org/themes/developers-corner> .
        "#
        .to_vec();
        let source = SourceConfig {
            source_id: "rdf-source".to_string(),
            url: "http://example.org/data.ttl".to_string(),
            enabled: true,
            format: SourceFormat::Rdf,
            rdf_syntax: RdfSyntax::Turtle,
            discard: DiscardFilter {
                predicates: Vec::new(),
                blocked: vec!["http://example.org/themes/developers-corner".to_string()],
            },
        };

        let fetcher = StaticPages {
            pages: vec![turtle],
        };
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();
        let licenses = MemoryLicenses::default();
        let transform = NoopTransform;
        let mut pipeline = HarvestPipeline {
            fetcher: &fetcher,
            store: &mut store,
            catalog: &mut catalog,
            licenses: &licenses,
            transform: &transform,
            options: RunOptions::default(),
        };
        let summary = pipeline.run_source(&source).await.unwrap();

        assert!(summary.errors.is_empty());
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn names_are_synthesized_and_kept_unique() {
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();

        // two different datasets sharing one title
        let page = br#"{"dataset": [
                {"identifier": "d1", "title": "Annual Report", "publisher": "CO"},
                {"identifier": "d2", "title": "Annual Report", "publisher": "CO"}
            ]}"#
        .to_vec();
        let summary = run(
            vec![page],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        assert_eq!(summary.created, 2);

        let mut names: Vec<String> = store
            .objects()
            .filter_map(|o| o.record_id.as_ref())
            .filter_map(|id| catalog.get(id))
            .filter_map(|r| r.name.clone())
            .collect();
        names.sort();
        assert_eq!(names, vec!["annual-report", "annual-report-2"]);
    }

    #[tokio::test]
    async fn force_reimports_an_existing_object_in_place() {
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();

        run(
            vec![json_page(&["a"])],
            &mut store,
            &mut catalog,
            RunOptions::default(),
        )
        .await;
        assert_eq!(catalog.len(), 1);

        // re-import the stored current object; its status is still `new`
        // from the original run, so only the force option keeps it from
        // creating a duplicate record
        let id = store
            .objects()
            .find(|o| o.guid == "a" && o.current)
            .map(|o| o.id)
            .unwrap();
        let mut object = store.get(id).unwrap().unwrap();
        let source = json_source();
        let format = source.dataset_format();
        let licenses = MemoryLicenses::default();
        let transform = NoopTransform;
        let outcome = Importer::new(
            format.as_ref(),
            &mut store,
            &mut catalog,
            &licenses,
            &transform,
        )
        .import_object(&mut object, &RunOptions { force_import: true })
        .unwrap();

        assert!(matches!(outcome, ImportOutcome::Updated(_)));
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn exactly_one_object_per_guid_stays_current() {
        let mut store = MemoryStore::new();
        let mut catalog = MemoryCatalog::new();

        for _ in 0..3 {
            run(
                vec![json_page(&["a"])],
                &mut store,
                &mut catalog,
                RunOptions::default(),
            )
            .await;
        }
        let current: Vec<_> = store
            .objects()
            .filter(|o| o.guid == "a" && o.current)
            .collect();
        assert_eq!(current.len(), 1);
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Greenbelt boundaries, 2014!"), "greenbelt-boundaries-2014");
        assert_eq!(slugify("  "), "");
    }

    #[test]
    fn registry_yaml_round_trips() {
        let registry = SourceRegistry::from_yaml(
            r#"
sources:
  - source_id: odc
    url: http://example.org/data.rdf
    format: rdf
    rdf_syntax: xml
    discard:
      blocked:
        - http://example.org/themes/developers-corner
  - source_id: eddc
    url: http://example.org/data.json
    format: json
"#,
        )
        .unwrap();
        assert_eq!(registry.sources.len(), 2);
        assert_eq!(registry.sources[0].format, SourceFormat::Rdf);
        assert_eq!(registry.sources[0].rdf_syntax, RdfSyntax::Xml);
        assert!(!registry.sources[0].discard.is_empty());
        assert!(registry.sources[1].enabled);
    }
}
