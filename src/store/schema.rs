//! Snapshot store DDL
//!
//! Two tables: one unified snapshot per unique Ethereum block timestamp,
//! plus per-address balance rows owned by their snapshot through the
//! timestamp key. Balance rows cascade on snapshot deletion.

pub const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS unified_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    eth_block_number INTEGER NOT NULL,
    eth_block_timestamp INTEGER NOT NULL UNIQUE,
    bridge_balance_trb REAL,
    layer_block_height INTEGER,
    layer_block_timestamp INTEGER,
    layer_total_supply_trb REAL,
    bonded_tokens REAL,
    not_bonded_tokens REAL,
    total_addresses INTEGER,
    addresses_with_balance INTEGER,
    total_balance_loya INTEGER,
    total_balance_trb REAL,
    free_floating_trb REAL,
    collection_time TEXT NOT NULL,
    data_completeness_score REAL NOT NULL DEFAULT 0.0
);

CREATE INDEX IF NOT EXISTS idx_snapshots_eth_timestamp
    ON unified_snapshots (eth_block_timestamp);

CREATE INDEX IF NOT EXISTS idx_snapshots_layer_height
    ON unified_snapshots (layer_block_height);

CREATE TABLE IF NOT EXISTS balance_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    eth_block_timestamp INTEGER NOT NULL
        REFERENCES unified_snapshots (eth_block_timestamp) ON DELETE CASCADE,
    address TEXT NOT NULL,
    account_type TEXT NOT NULL,
    loya_balance INTEGER NOT NULL,
    trb_balance REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_balance_records_eth_timestamp
    ON balance_records (eth_block_timestamp);

CREATE INDEX IF NOT EXISTS idx_balance_records_address
    ON balance_records (address);
"#;
