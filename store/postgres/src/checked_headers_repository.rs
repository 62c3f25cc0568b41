use std::sync::Arc;

use diesel::sql_types::{BigInt, Jsonb, Text};
use diesel::{sql_query, OptionalExtension, QueryableByName, RunQueryDsl};

use delver::components::store::{CheckedHeadersRepository as CheckedHeadersRepositoryTrait, StoreError};
use delver::data::header::{BlockNumber, Header};
use delver::util::hex::h256_from_hex;

use crate::{store_error, ConnectionPool};

/// Offsets between rechecks grow as triangular numbers of this multiplier,
/// so tip headers are rechecked aggressively and deep headers rarely.
const RECHECK_OFFSET_MULTIPLIER: i64 = 15;

/// Check counts for one transformer set, stored in `<schema>.checked_headers`.
/// The schema name is validated at construction and spliced into queries;
/// bind parameters cannot name a schema.
pub struct CheckedHeadersRepository {
    pool: Arc<ConnectionPool>,
    schema_name: String,
}

#[derive(QueryableByName)]
struct HeaderSqlRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    block_number: i64,
    #[diesel(sql_type = Text)]
    hash: String,
    #[diesel(sql_type = Text)]
    parent_hash: String,
    #[diesel(sql_type = Jsonb)]
    raw: serde_json::Value,
    #[diesel(sql_type = BigInt)]
    block_timestamp: i64,
}

impl HeaderSqlRow {
    fn into_header(self) -> Result<Header, StoreError> {
        Ok(Header {
            id: self.id,
            block_number: self.block_number,
            hash: h256_from_hex(&self.hash)?,
            parent_hash: h256_from_hex(&self.parent_hash)?,
            raw: self.raw,
            timestamp: self.block_timestamp,
        })
    }
}

impl CheckedHeadersRepository {
    /// Fails with `StoreError::InvalidSchema` when the schema has not been
    /// created, which usually means the transformer set's migrations have
    /// not run.
    pub fn new(pool: Arc<ConnectionPool>, schema_name: &str) -> Result<Self, StoreError> {
        #[derive(QueryableByName)]
        struct SchemaRow {
            #[diesel(sql_type = Text)]
            schema_name: String,
        }

        let mut conn = pool.get()?;
        let row: Option<SchemaRow> = sql_query(
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name = $1",
        )
        .bind::<Text, _>(schema_name)
        .get_result(&mut conn)
        .optional()
        .map_err(store_error)?;

        // Use the name reported by information_schema rather than the one
        // passed in, so later query splicing only ever sees a name the
        // database vouches for.
        match row {
            Some(row) => Ok(CheckedHeadersRepository {
                pool,
                schema_name: row.schema_name,
            }),
            None => Err(StoreError::InvalidSchema(schema_name.to_string())),
        }
    }
}

impl CheckedHeadersRepositoryTrait for CheckedHeadersRepository {
    fn mark_header_checked(&self, header_id: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        sql_query(format!(
            "INSERT INTO {}.checked_headers (check_count, header_id) VALUES (1, $1) \
             ON CONFLICT (header_id) \
             DO UPDATE SET check_count = checked_headers.check_count + 1",
            self.schema_name
        ))
        .bind::<BigInt, _>(header_id)
        .execute(&mut conn)
        .map_err(store_error)?;
        Ok(())
    }

    fn mark_single_header_unchecked(&self, block_number: BlockNumber) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        sql_query(format!(
            "UPDATE {}.checked_headers ch SET check_count = 0 \
             FROM public.headers h \
             WHERE ch.header_id = h.id AND h.block_number = $1",
            self.schema_name
        ))
        .bind::<BigInt, _>(block_number)
        .execute(&mut conn)
        .map_err(store_error)?;
        Ok(())
    }

    fn unchecked_headers(
        &self,
        start: BlockNumber,
        end: BlockNumber,
        check_count: i64,
    ) -> Result<Vec<Header>, StoreError> {
        let join_query = format!(
            "WITH checked_headers AS ( \
                 SELECT h.id, h.block_number, h.hash, h.parent_hash, h.raw, h.block_timestamp, \
                        COALESCE(ch.check_count, 0) AS check_count \
                 FROM public.headers h \
                 LEFT JOIN {}.checked_headers ch ON ch.header_id = h.id \
                 WHERE h.block_number >= $1 \
             ) \
             SELECT id, block_number, hash, parent_hash, raw, block_timestamp \
             FROM checked_headers \
             WHERE (check_count < 1 \
                 OR (check_count < $2 \
                     AND block_number <= ((SELECT MAX(block_number) FROM public.headers) \
                         - ($3 * check_count * (check_count + 1) / 2))))",
            self.schema_name
        );

        let mut conn = self.pool.get()?;
        let rows: Vec<HeaderSqlRow> = if end == -1 {
            sql_query(join_query)
                .bind::<BigInt, _>(start)
                .bind::<BigInt, _>(check_count)
                .bind::<BigInt, _>(RECHECK_OFFSET_MULTIPLIER)
                .load(&mut conn)
                .map_err(store_error)?
        } else {
            sql_query(format!("{} AND block_number <= $4", join_query))
                .bind::<BigInt, _>(start)
                .bind::<BigInt, _>(check_count)
                .bind::<BigInt, _>(RECHECK_OFFSET_MULTIPLIER)
                .bind::<BigInt, _>(end)
                .load(&mut conn)
                .map_err(store_error)?
        };

        rows.into_iter().map(HeaderSqlRow::into_header).collect()
    }
}
