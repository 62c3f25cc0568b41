use std::sync::Arc;

use diesel::{insert_into, update, ExpressionMethods, QueryDsl, RunQueryDsl};
use web3::types::Log;

use delver::components::store::{EventLogRepository as EventLogRepositoryTrait, StoreError};
use delver::data::event_log::EventLog;
use delver::util::hex::{h160_from_bytes, h256_from_bytes, h256_from_hex, h256_to_hex};

use crate::schema::event_logs;
use crate::{store_error, ConnectionPool};

/// Raw event logs in `public.event_logs`, unique per `(tx_hash, log_index)`.
pub struct EventLogRepository {
    pool: Arc<ConnectionPool>,
}

type EventLogRow = (
    i64,
    i64,
    Vec<u8>,
    Vec<Vec<u8>>,
    Vec<u8>,
    i64,
    String,
    i64,
    i64,
    bool,
);

fn event_log_from_row(row: EventLogRow) -> Result<EventLog, StoreError> {
    let (id, header_id, address, topics, data, block_number, tx_hash, tx_index, log_index, transformed) =
        row;
    Ok(EventLog {
        id,
        header_id,
        address: h160_from_bytes(&address)?,
        topics: topics
            .iter()
            .map(|topic| h256_from_bytes(topic))
            .collect::<Result<_, _>>()?,
        data,
        block_number,
        tx_hash: h256_from_hex(&tx_hash)?,
        tx_index,
        log_index,
        transformed,
    })
}

impl EventLogRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        EventLogRepository { pool }
    }
}

impl EventLogRepositoryTrait for EventLogRepository {
    fn create_event_logs(&self, header_id: i64, logs: &[Log]) -> Result<(), StoreError> {
        let mut rows = Vec::with_capacity(logs.len());
        for log in logs {
            // Logs for mined blocks always carry transaction metadata; a
            // log without it cannot satisfy the uniqueness key.
            let tx_hash = log.transaction_hash.ok_or_else(|| {
                StoreError::Unknown(anyhow::anyhow!("event log missing transaction hash"))
            })?;
            let tx_index = log.transaction_index.ok_or_else(|| {
                StoreError::Unknown(anyhow::anyhow!("event log missing transaction index"))
            })?;
            let log_index = log.log_index.ok_or_else(|| {
                StoreError::Unknown(anyhow::anyhow!("event log missing log index"))
            })?;
            let block_number = log.block_number.ok_or_else(|| {
                StoreError::Unknown(anyhow::anyhow!("event log missing block number"))
            })?;

            rows.push((
                event_logs::header_id.eq(header_id),
                event_logs::address.eq(log.address.as_bytes().to_vec()),
                event_logs::topics.eq(log
                    .topics
                    .iter()
                    .map(|topic| topic.as_bytes().to_vec())
                    .collect::<Vec<_>>()),
                event_logs::data.eq(log.data.0.clone()),
                event_logs::block_number.eq(block_number.as_u64() as i64),
                event_logs::tx_hash.eq(h256_to_hex(&tx_hash)),
                event_logs::tx_index.eq(tx_index.as_u64() as i64),
                event_logs::log_index.eq(log_index.low_u64() as i64),
                event_logs::transformed.eq(false),
            ));
        }

        let mut conn = self.pool.get()?;
        insert_into(event_logs::table)
            .values(&rows)
            .on_conflict((event_logs::tx_hash, event_logs::log_index))
            .do_nothing()
            .execute(&mut conn)
            .map_err(store_error)?;
        Ok(())
    }

    fn untransformed_logs(&self, limit: i64) -> Result<Vec<EventLog>, StoreError> {
        let mut conn = self.pool.get()?;
        let rows: Vec<EventLogRow> = event_logs::table
            .filter(event_logs::transformed.eq(false))
            .order(event_logs::id.asc())
            .limit(limit)
            .load(&mut conn)
            .map_err(store_error)?;
        rows.into_iter().map(event_log_from_row).collect()
    }

    fn mark_logs_transformed(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        update(event_logs::table.filter(event_logs::id.eq_any(ids)))
            .set(event_logs::transformed.eq(true))
            .execute(&mut conn)
            .map_err(store_error)?;
        Ok(())
    }
}
