//! Shared helpers for pipeline tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::assets::{AssetStore, FsAssetStore};
use crate::config::Config;
use crate::db::Database;
use crate::error::GenerationError;
use crate::generation::{GenerationClient, GenerationConstraints};
use crate::pipeline::{Collaborators, Pipeline};
use crate::registry::{ContentTemplate, SlotSpec, TemplateRegistry, TemplateSpec};
use crate::retry::RecordingSleeper;

/// Generation client that replays scripted results per prompt
///
/// Prompts without a script (or whose script ran out) succeed with bytes
/// derived from the prompt.
#[derive(Default)]
pub(crate) struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<Vec<u8>, GenerationError>>>>,
    calls: Mutex<Vec<String>>,
    total: AtomicU32,
}

impl ScriptedClient {
    pub(crate) fn script(&self, prompt: &str, results: Vec<Result<Vec<u8>, GenerationError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(prompt.to_string(), results.into());
    }

    pub(crate) fn calls(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, prompt: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == prompt)
            .count()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(
        &self,
        prompt: &str,
        _constraints: &GenerationConstraints,
    ) -> Result<Vec<u8>, GenerationError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(prompt.to_string());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(prompt)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(format!("image for {prompt}").into_bytes()))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// A pipeline wired to a scripted client, a temp asset dir and a temp database
pub(crate) struct TestPipeline {
    pub(crate) pipeline: Pipeline,
    pub(crate) client: Arc<ScriptedClient>,
    pub(crate) sleeper: Arc<RecordingSleeper>,
    pub(crate) assets: Arc<FsAssetStore>,
    pub(crate) db: Arc<Database>,
    pub(crate) _dir: Arc<TempDir>,
}

/// Test configuration: 5-word minimum, default retry policy
pub(crate) fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.assets.asset_dir = dir.path().join("assets");
    config.assets.public_prefix = "/images/generated".to_string();
    config.publish.database_path = dir.path().join("content.db");
    config.validation.min_words = 5;
    config
}

/// Build a test pipeline; reuse `dir` to simulate a second run
pub(crate) async fn create_test_pipeline(
    dir: Arc<TempDir>,
    config: Config,
    client: Arc<ScriptedClient>,
) -> TestPipeline {
    let sleeper = Arc::new(RecordingSleeper::default());
    let assets = Arc::new(FsAssetStore::from_config(&config.assets).await.unwrap());
    let db = Arc::new(Database::new(&config.publish.database_path).await.unwrap());

    let pipeline = Pipeline::with_collaborators(
        config,
        Collaborators {
            client: client.clone(),
            assets: assets.clone() as Arc<dyn AssetStore>,
            store: db.clone(),
            sleeper: sleeper.clone(),
        },
    )
    .unwrap();

    TestPipeline {
        pipeline,
        client,
        sleeper,
        assets,
        db,
        _dir: dir,
    }
}

/// Template with `slots` slots whose prompts are `"{slug} {i}"`
pub(crate) fn template(slug: &str, slots: usize, words: usize) -> ContentTemplate {
    let mut body = vec!["word"; words].join(" ");
    for i in 1..=slots {
        body.push_str(&format!("\n\n{{{{image:{i}}}}}"));
    }
    ContentTemplate::from_spec(TemplateSpec {
        slug: slug.to_string(),
        title: [("en".to_string(), format!("Title of {slug}"))].into(),
        description: [("en".to_string(), "Description".to_string())].into(),
        body: [("en".to_string(), body)].into(),
        tags: vec!["test".to_string()],
        extra: serde_json::Value::Null,
        slots: (1..=slots)
            .map(|i| SlotSpec {
                prompt: format!("{slug} {i}"),
                fallback: format!("/images/fallback/{slug}-{i}.jpg"),
                token: None,
                alt: None,
            })
            .collect(),
    })
    .unwrap()
}

pub(crate) fn registry(templates: Vec<ContentTemplate>) -> TemplateRegistry {
    TemplateRegistry::new(templates).unwrap()
}

pub(crate) fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
