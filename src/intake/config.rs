use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_attachments: usize,
    pub max_attachment_bytes: usize,
    pub allowed_kinds: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_attachments: 10,
            max_attachment_bytes: 10 * 1024 * 1024,
            allowed_kinds: vec![
                "pdf".to_string(),
                "png".to_string(),
                "jpeg".to_string(),
                "webp".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub provider: String,
    pub model: String,
    pub timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-flash-latest".to_string(),
            timeout_secs: 20,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingConfig {
    #[serde(default)]
    pub default_tenant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub sweep_interval_secs: u64,
    pub message_days: u64,
    pub document_days: u64,
    pub dossier_closed_days: u64,
    pub staging_max_age_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3_600,
            message_days: 365,
            document_days: 365,
            dossier_closed_days: 90,
            staging_max_age_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefilterConfig {
    pub enabled: bool,
    pub process_threshold: i32,
    pub light_threshold: i32,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_threshold: 40,
            light_threshold: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    pub auto_send: bool,
    pub from_address: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            auto_send: false,
            from_address: "intake@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    pub poll_interval_secs: u64,
    pub workers: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntakeConfig {
    pub limits: LimitsConfig,
    pub classifier: ClassifierConfig,
    pub routing: RoutingConfig,
    pub retention: RetentionConfig,
    pub prefilter: PrefilterConfig,
    pub reply: ReplyConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialIntakeConfig {
    limits: Option<LimitsConfig>,
    classifier: Option<ClassifierConfig>,
    routing: Option<RoutingConfig>,
    retention: Option<RetentionConfig>,
    prefilter: Option<PrefilterConfig>,
    reply: Option<ReplyConfig>,
    watch: Option<WatchConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_i32(var: &str, fallback: i32) -> i32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<i32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_non_empty_first(vars: &[&str]) -> Option<String> {
    for var in vars {
        if let Ok(v) = env::var(var) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_ascii_lowercase)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

pub fn validate(cfg: &IntakeConfig) -> Result<()> {
    if cfg.limits.max_attachments == 0 {
        return Err(anyhow!("invalid max attachments: must be >= 1"));
    }
    if cfg.limits.max_attachment_bytes == 0 {
        return Err(anyhow!("invalid max attachment bytes: must be >= 1"));
    }
    if cfg.limits.allowed_kinds.is_empty() {
        return Err(anyhow!("invalid allowed kinds: list cannot be empty"));
    }
    if cfg.classifier.provider != "gemini" && cfg.classifier.provider != "local" {
        return Err(anyhow!(
            "invalid classifier provider: use `gemini` or `local`"
        ));
    }
    if cfg.classifier.timeout_secs == 0 {
        return Err(anyhow!("invalid classifier timeout: must be >= 1 second"));
    }
    if cfg.retention.sweep_interval_secs == 0 {
        return Err(anyhow!("invalid sweep interval: must be >= 1 second"));
    }
    if cfg.retention.message_days == 0
        || cfg.retention.document_days == 0
        || cfg.retention.dossier_closed_days == 0
    {
        return Err(anyhow!("invalid retention window: days must be >= 1"));
    }
    if cfg.prefilter.light_threshold > cfg.prefilter.process_threshold {
        return Err(anyhow!(
            "invalid prefilter thresholds: require light <= process"
        ));
    }
    if cfg.watch.poll_interval_secs == 0 {
        return Err(anyhow!("invalid watch poll interval: must be >= 1 second"));
    }
    if cfg.watch.workers == 0 {
        return Err(anyhow!("invalid watch workers: must be >= 1"));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("INTAKE_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    if let Ok(home) = env::var("INTAKE_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed).join("intake.toml"));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".dossier-intake").join("intake.toml"))
}

fn merge_file_config(base: &mut IntakeConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse intake config {}: {err}", path.display()))
}

fn merge_toml(base: &mut IntakeConfig, raw: &str) -> Result<()> {
    let parsed: PartialIntakeConfig = toml::from_str(raw)?;
    if let Some(limits) = parsed.limits {
        base.limits = limits;
    }
    if let Some(classifier) = parsed.classifier {
        base.classifier = classifier;
    }
    if let Some(routing) = parsed.routing {
        base.routing = routing;
    }
    if let Some(retention) = parsed.retention {
        base.retention = retention;
    }
    if let Some(prefilter) = parsed.prefilter {
        base.prefilter = prefilter;
    }
    if let Some(reply) = parsed.reply {
        base.reply = reply;
    }
    if let Some(watch) = parsed.watch {
        base.watch = watch;
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut IntakeConfig) {
    cfg.limits.max_attachments = env_or_usize("INTAKE_MAX_ATTACHMENTS", cfg.limits.max_attachments);
    cfg.limits.max_attachment_bytes = env_or_usize(
        "INTAKE_MAX_ATTACHMENT_BYTES",
        cfg.limits.max_attachment_bytes,
    );
    cfg.limits.allowed_kinds = env_or_csv("INTAKE_ALLOWED_KINDS", &cfg.limits.allowed_kinds);

    cfg.classifier.provider = env_or_string("INTAKE_CLASSIFIER_PROVIDER", &cfg.classifier.provider);
    cfg.classifier.model = env_or_string("INTAKE_CLASSIFIER_MODEL", &cfg.classifier.model);
    cfg.classifier.timeout_secs =
        env_or_u64("INTAKE_CLASSIFIER_TIMEOUT_SECS", cfg.classifier.timeout_secs);
    cfg.classifier.api_key = env_non_empty_first(&["INTAKE_CLASSIFIER_API_KEY", "GEMINI_API_KEY"]);
    if cfg.classifier.api_key.is_none() {
        cfg.classifier.provider = "local".to_string();
    }

    if let Some(alias) = env_non_empty_first(&["INTAKE_DEFAULT_TENANT"]) {
        cfg.routing.default_tenant = Some(alias);
    }

    cfg.retention.sweep_interval_secs = env_or_u64(
        "INTAKE_SWEEP_INTERVAL_SECS",
        cfg.retention.sweep_interval_secs,
    );
    cfg.retention.message_days =
        env_or_u64("INTAKE_RETENTION_MESSAGE_DAYS", cfg.retention.message_days);
    cfg.retention.document_days =
        env_or_u64("INTAKE_RETENTION_DOCUMENT_DAYS", cfg.retention.document_days);
    cfg.retention.dossier_closed_days = env_or_u64(
        "INTAKE_RETENTION_DOSSIER_DAYS",
        cfg.retention.dossier_closed_days,
    );
    cfg.retention.staging_max_age_secs = env_or_u64(
        "INTAKE_STAGING_MAX_AGE_SECS",
        cfg.retention.staging_max_age_secs,
    );

    cfg.prefilter.enabled = env_or_bool("INTAKE_PREFILTER_ENABLED", cfg.prefilter.enabled);
    cfg.prefilter.process_threshold = env_or_i32(
        "INTAKE_PREFILTER_PROCESS_THRESHOLD",
        cfg.prefilter.process_threshold,
    );
    cfg.prefilter.light_threshold = env_or_i32(
        "INTAKE_PREFILTER_LIGHT_THRESHOLD",
        cfg.prefilter.light_threshold,
    );

    cfg.reply.auto_send = env_or_bool("INTAKE_AUTO_REPLY", cfg.reply.auto_send);
    cfg.reply.from_address = env_or_string("INTAKE_REPLY_FROM", &cfg.reply.from_address);

    cfg.watch.poll_interval_secs =
        env_or_u64("INTAKE_POLL_INTERVAL_SECS", cfg.watch.poll_interval_secs);
    cfg.watch.workers = env_or_usize("INTAKE_WATCH_WORKERS", cfg.watch.workers);
}

pub fn load_config() -> Result<IntakeConfig> {
    let mut cfg = IntakeConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
