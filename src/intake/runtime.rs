//! Wires paths, config, store, and key material for the commands.

use crate::intake::classifier::build_classifier;
use crate::intake::config::{IntakeConfig, load_config};
use crate::intake::content_store::{ContentStore, load_or_create_master_key};
use crate::intake::paths::{IntakePaths, resolve_paths};
use crate::intake::pipeline::Intake;
use crate::intake::reply::OutboxMailer;
use crate::intake::retention::RetentionSweeper;
use crate::intake::store::Store;
use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;

pub struct Runtime {
    pub paths: IntakePaths,
    pub cfg: IntakeConfig,
    pub store: Arc<Store>,
}

impl Runtime {
    pub fn open() -> Result<Self> {
        let paths = resolve_paths()?;
        let cfg = load_config()?;
        for dir in [&paths.state_dir, &paths.blobs_dir, &paths.staging_dir, &paths.logs_dir] {
            fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let store = Arc::new(
            Store::open(&paths.state_dir)
                .with_context(|| format!("failed to open store in {}", paths.state_dir.display()))?,
        );
        Ok(Self { paths, cfg, store })
    }

    pub fn content_store(&self) -> Result<Arc<ContentStore>> {
        let key = load_or_create_master_key(&self.paths).context("failed to load master key")?;
        Ok(Arc::new(ContentStore::new(
            self.store.clone(),
            self.paths.blobs_dir.clone(),
            self.paths.staging_dir.clone(),
            key,
        )))
    }

    pub fn intake(&self) -> Result<Intake> {
        let mailer = Arc::new(OutboxMailer::new(
            self.paths.outbox_dir.clone(),
            self.cfg.reply.from_address.clone(),
        ));
        Ok(Intake::new(
            self.store.clone(),
            self.content_store()?,
            build_classifier(&self.cfg.classifier),
            mailer,
            self.cfg.clone(),
        )?)
    }

    pub fn sweeper(&self) -> Result<RetentionSweeper> {
        Ok(RetentionSweeper::new(
            self.store.clone(),
            self.content_store()?,
            self.cfg.retention.clone(),
        ))
    }
}
