//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! Timestamps are stored as epoch milliseconds so range predicates compare
//! integers.

use sea_query::Iden;

#[derive(Iden)]
pub enum IdempotencyKeys {
    Table,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "idem_key"]
    Key,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "expires_at"]
    ExpiresAt,
}

#[derive(Iden)]
pub enum ProcessedSignals {
    Table,
    #[iden = "dedup_id"]
    DedupId,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

#[derive(Iden)]
pub enum MarketingSignals {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "call_id"]
    CallId,
    #[iden = "click_chain"]
    ClickChain,
    #[iden = "gear"]
    Gear,
    #[iden = "value_cents"]
    ValueCents,
    #[iden = "currency"]
    Currency,
    #[iden = "signal_time"]
    SignalTime,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
}

#[derive(Iden)]
pub enum Observations {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "session_id"]
    SessionId,
    #[iden = "fingerprint"]
    Fingerprint,
    #[iden = "url"]
    Url,
    #[iden = "observed_at"]
    ObservedAt,
    #[iden = "expires_at"]
    ExpiresAt,
}

#[derive(Iden)]
pub enum ConversionQueue {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "site_id"]
    SiteId,
    #[iden = "provider"]
    Provider,
    #[iden = "call_id"]
    CallId,
    #[iden = "sale_id"]
    SaleId,
    #[iden = "session_id"]
    SessionId,
    #[iden = "gclid"]
    Gclid,
    #[iden = "wbraid"]
    Wbraid,
    #[iden = "gbraid"]
    Gbraid,
    #[iden = "value_cents"]
    ValueCents,
    #[iden = "currency"]
    Currency,
    #[iden = "conversion_time"]
    ConversionTime,
    #[iden = "status"]
    Status,
    #[iden = "attempt_count"]
    AttemptCount,
    #[iden = "provider_error_code"]
    ProviderErrorCode,
    #[iden = "provider_error_category"]
    ProviderErrorCategory,
    #[iden = "last_error"]
    LastError,
    #[iden = "next_retry_at"]
    NextRetryAt,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

#[derive(Iden)]
pub enum TrackedEvents {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "partition_key"]
    Partition,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "session_id"]
    SessionId,
    #[iden = "fingerprint"]
    Fingerprint,
    #[iden = "event_name"]
    EventName,
    #[iden = "url"]
    Url,
    #[iden = "occurred_at"]
    OccurredAt,
}

#[derive(Iden)]
pub enum Calls {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "partition_key"]
    Partition,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "session_id"]
    SessionId,
    #[iden = "fingerprint"]
    Fingerprint,
    #[iden = "intent_action"]
    IntentAction,
    #[iden = "intent_target"]
    IntentTarget,
    #[iden = "lead_score"]
    LeadScore,
    #[iden = "ad_context"]
    AdContext,
    #[iden = "click_ids"]
    ClickIds,
    #[iden = "created_at"]
    CreatedAt,
}

#[derive(Iden)]
pub enum Sessions {
    Table,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "fingerprint"]
    Fingerprint,
    #[iden = "session_id"]
    SessionId,
    #[iden = "analytics_consent"]
    AnalyticsConsent,
    #[iden = "gclid"]
    Gclid,
    #[iden = "wbraid"]
    Wbraid,
    #[iden = "gbraid"]
    Gbraid,
    #[iden = "click_time"]
    ClickTime,
    #[iden = "updated_at"]
    UpdatedAt,
}

#[derive(Iden)]
pub enum UsageCounters {
    Table,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "month"]
    Month,
    #[iden = "event_count"]
    Count,
}

#[derive(Iden)]
pub enum DeadLetters {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "site_id"]
    SiteId,
    #[iden = "queue_message_id"]
    QueueMessageId,
    #[iden = "stage"]
    Stage,
    #[iden = "error"]
    Error,
    #[iden = "error_class"]
    ErrorClass,
    #[iden = "attempts"]
    Attempts,
    #[iden = "payload"]
    Payload,
    #[iden = "metadata"]
    Metadata,
    #[iden = "occurred_at"]
    OccurredAt,
}

#[derive(Iden)]
pub enum JobOutbox {
    Table,
    #[iden = "message_id"]
    MessageId,
    #[iden = "dedup_id"]
    DedupId,
    #[iden = "tenant_id"]
    TenantId,
    #[iden = "job"]
    Job,
    #[iden = "created_at"]
    CreatedAt,
}

pub const CREATE_IDEMPOTENCY_KEYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS idempotency_keys (
    tenant_id TEXT NOT NULL,
    idem_key TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, idem_key)
);
"#;

pub const CREATE_PROCESSED_SIGNALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS processed_signals (
    dedup_id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

pub const CREATE_MARKETING_SIGNALS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS marketing_signals (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    call_id TEXT,
    click_chain TEXT,
    gear TEXT NOT NULL,
    value_cents INTEGER NOT NULL CHECK (value_cents >= 0),
    currency TEXT NOT NULL,
    signal_time INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_signals_tenant_status ON marketing_signals(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_signals_pulse ON marketing_signals(tenant_id, gear, signal_time);
"#;

pub const CREATE_OBSERVATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL,
    session_id TEXT,
    fingerprint TEXT NOT NULL,
    url TEXT,
    observed_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observations_tenant ON observations(tenant_id, expires_at);
"#;

pub const CREATE_CONVERSION_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS conversion_queue (
    id TEXT PRIMARY KEY NOT NULL,
    site_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    call_id TEXT,
    sale_id TEXT NOT NULL,
    session_id TEXT,
    gclid TEXT,
    wbraid TEXT,
    gbraid TEXT,
    value_cents INTEGER NOT NULL,
    currency TEXT NOT NULL,
    conversion_time INTEGER NOT NULL,
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    provider_error_code TEXT,
    provider_error_category TEXT,
    last_error TEXT,
    next_retry_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_due ON conversion_queue(provider, status, next_retry_at);
CREATE INDEX IF NOT EXISTS idx_queue_site ON conversion_queue(site_id, status);
"#;

pub const CREATE_TRACKED_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_events (
    id TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    session_id TEXT,
    fingerprint TEXT NOT NULL,
    event_name TEXT NOT NULL,
    url TEXT,
    occurred_at INTEGER NOT NULL,
    PRIMARY KEY (id, partition_key)
);
"#;

pub const CREATE_CALLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS calls (
    id TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    session_id TEXT,
    fingerprint TEXT NOT NULL,
    intent_action TEXT NOT NULL,
    intent_target TEXT NOT NULL,
    lead_score INTEGER,
    ad_context TEXT,
    click_ids TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (id, partition_key)
);

CREATE INDEX IF NOT EXISTS idx_calls_id ON calls(id);
"#;

pub const CREATE_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    tenant_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    session_id TEXT NOT NULL,
    analytics_consent INTEGER NOT NULL DEFAULT 0,
    gclid TEXT,
    wbraid TEXT,
    gbraid TEXT,
    click_time INTEGER,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, fingerprint)
);
"#;

pub const CREATE_USAGE_COUNTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS usage_counters (
    tenant_id TEXT NOT NULL,
    month TEXT NOT NULL,
    event_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant_id, month)
);
"#;

pub const CREATE_DEAD_LETTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dead_letters (
    id TEXT PRIMARY KEY NOT NULL,
    site_id TEXT NOT NULL,
    queue_message_id TEXT NOT NULL,
    stage TEXT NOT NULL,
    error TEXT NOT NULL,
    error_class TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    payload TEXT NOT NULL,
    metadata TEXT NOT NULL,
    occurred_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_site ON dead_letters(site_id, occurred_at);
"#;

pub const CREATE_JOB_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS job_outbox (
    message_id TEXT PRIMARY KEY NOT NULL,
    dedup_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    job TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_outbox_created_at ON job_outbox(created_at);
"#;

/// Every table, in creation order.
pub const ALL_TABLES: &[&str] = &[
    CREATE_IDEMPOTENCY_KEYS_TABLE,
    CREATE_PROCESSED_SIGNALS_TABLE,
    CREATE_MARKETING_SIGNALS_TABLE,
    CREATE_OBSERVATIONS_TABLE,
    CREATE_CONVERSION_QUEUE_TABLE,
    CREATE_TRACKED_EVENTS_TABLE,
    CREATE_CALLS_TABLE,
    CREATE_SESSIONS_TABLE,
    CREATE_USAGE_COUNTERS_TABLE,
    CREATE_DEAD_LETTERS_TABLE,
    CREATE_JOB_OUTBOX_TABLE,
];
