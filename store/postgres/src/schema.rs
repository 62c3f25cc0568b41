//! Tables in the `public` schema. The per-transformer `checked_headers`
//! tables live in runtime-named schemas and are reached through
//! `sql_query` instead.

diesel::table! {
    eth_nodes (id) {
        id -> BigInt,
        client_name -> Varchar,
        network_id -> Varchar,
    }
}

diesel::table! {
    headers (id) {
        id -> BigInt,
        block_number -> BigInt,
        hash -> Varchar,
        parent_hash -> Varchar,
        raw -> Jsonb,
        block_timestamp -> BigInt,
        eth_node_id -> BigInt,
    }
}

diesel::table! {
    event_logs (id) {
        id -> BigInt,
        header_id -> BigInt,
        address -> Bytea,
        topics -> Array<Bytea>,
        data -> Bytea,
        block_number -> BigInt,
        tx_hash -> Varchar,
        tx_index -> BigInt,
        log_index -> BigInt,
        transformed -> Bool,
    }
}

diesel::table! {
    storage_diff (id) {
        id -> BigInt,
        address -> Bytea,
        block_height -> BigInt,
        block_hash -> Bytea,
        storage_key -> Bytea,
        storage_value -> Bytea,
        from_backfill -> Bool,
        status -> Text,
        header_id -> Nullable<BigInt>,
        eth_node_id -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(eth_nodes, headers, event_logs, storage_diff);
