use std::sync::Arc;

use diesel::sql_types::{BigInt, Bytea};
use diesel::{
    insert_into, sql_query, update, ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl,
};
use web3::types::H256;

use delver::components::store::{DiffRepository as DiffRepositoryTrait, StoreError};
use delver::data::header::BlockNumber;
use delver::data::storage_diff::{DiffStatus, PersistedDiff, RawDiff};
use delver::util::hex::{h160_from_bytes, h256_from_bytes};

use crate::schema::storage_diff;
use crate::{store_error, ConnectionPool};

/// Storage diffs in `public.storage_diff`, unique on
/// `(address, block_hash, storage_key, storage_value)`.
pub struct DiffRepository {
    pool: Arc<ConnectionPool>,
    eth_node_id: i64,
}

type DiffRow = (
    i64,
    Vec<u8>,
    i64,
    Vec<u8>,
    Vec<u8>,
    Vec<u8>,
    bool,
    String,
    Option<i64>,
    i64,
);

fn diff_from_row(row: DiffRow) -> Result<PersistedDiff, StoreError> {
    let (
        id,
        address,
        block_height,
        block_hash,
        storage_key,
        storage_value,
        from_backfill,
        status,
        header_id,
        eth_node_id,
    ) = row;
    Ok(PersistedDiff {
        id,
        status: status.parse::<DiffStatus>().map_err(StoreError::Unknown)?,
        from_backfill,
        header_id,
        eth_node_id,
        raw: RawDiff {
            address: h160_from_bytes(&address)?,
            block_height,
            block_hash: h256_from_bytes(&block_hash)?,
            storage_key: h256_from_bytes(&storage_key)?,
            storage_value: h256_from_bytes(&storage_value)?,
        },
    })
}

impl DiffRepository {
    pub fn new(pool: Arc<ConnectionPool>, eth_node_id: i64) -> Self {
        DiffRepository { pool, eth_node_id }
    }

    fn diffs_with_status(
        &self,
        status: DiffStatus,
        min_id: i64,
        limit: i64,
    ) -> Result<Vec<PersistedDiff>, StoreError> {
        let mut conn = self.pool.get()?;
        let rows: Vec<DiffRow> = storage_diff::table
            .filter(storage_diff::status.eq(status.as_str()))
            .filter(storage_diff::id.gt(min_id))
            .order(storage_diff::id.asc())
            .limit(limit)
            .load(&mut conn)
            .map_err(store_error)?;
        rows.into_iter().map(diff_from_row).collect()
    }

    fn update_status(&self, id: i64, status: DiffStatus) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        update(storage_diff::table.filter(storage_diff::id.eq(id)))
            .set(storage_diff::status.eq(status.as_str()))
            .execute(&mut conn)
            .map_err(store_error)?;
        Ok(())
    }
}

impl DiffRepositoryTrait for DiffRepository {
    fn create_storage_diff(&self, raw: &RawDiff) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        let id: Option<i64> = insert_into(storage_diff::table)
            .values((
                storage_diff::address.eq(raw.address.as_bytes().to_vec()),
                storage_diff::block_height.eq(raw.block_height),
                storage_diff::block_hash.eq(raw.block_hash.as_bytes().to_vec()),
                storage_diff::storage_key.eq(raw.storage_key.as_bytes().to_vec()),
                storage_diff::storage_value.eq(raw.storage_value.as_bytes().to_vec()),
                storage_diff::from_backfill.eq(false),
                storage_diff::status.eq(DiffStatus::New.as_str()),
                storage_diff::eth_node_id.eq(self.eth_node_id),
            ))
            .on_conflict((
                storage_diff::address,
                storage_diff::block_hash,
                storage_diff::storage_key,
                storage_diff::storage_value,
            ))
            .do_nothing()
            .returning(storage_diff::id)
            .get_result(&mut conn)
            .optional()
            .map_err(store_error)?;
        id.ok_or(StoreError::DuplicateDiff)
    }

    fn create_back_filled_storage_value(&self, raw: &RawDiff) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        // A back-fill only fills gaps: skip when the same value is already
        // recorded at or below the block, and skip a zero value entirely
        // unless the key has a prior non-zero diff it would be clearing.
        sql_query(
            "INSERT INTO public.storage_diff \
                 (address, block_height, block_hash, storage_key, storage_value, \
                  from_backfill, status, eth_node_id) \
             SELECT $1, $2, $3, $4, $5, true, 'new', $6 \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM public.storage_diff \
                 WHERE address = $1 AND storage_key = $4 AND storage_value = $5 \
                   AND block_height <= $2) \
               AND ($5 != $7 OR EXISTS ( \
                 SELECT 1 FROM public.storage_diff \
                 WHERE address = $1 AND storage_key = $4 AND storage_value != $7 \
                   AND block_height <= $2)) \
             ON CONFLICT DO NOTHING",
        )
        .bind::<Bytea, _>(raw.address.as_bytes().to_vec())
        .bind::<BigInt, _>(raw.block_height)
        .bind::<Bytea, _>(raw.block_hash.as_bytes().to_vec())
        .bind::<Bytea, _>(raw.storage_key.as_bytes().to_vec())
        .bind::<Bytea, _>(raw.storage_value.as_bytes().to_vec())
        .bind::<BigInt, _>(self.eth_node_id)
        .bind::<Bytea, _>(H256::zero().as_bytes().to_vec())
        .execute(&mut conn)
        .map_err(store_error)?;
        Ok(())
    }

    fn new_diffs(&self, min_id: i64, limit: i64) -> Result<Vec<PersistedDiff>, StoreError> {
        self.diffs_with_status(DiffStatus::New, min_id, limit)
    }

    fn unrecognized_diffs(
        &self,
        min_id: i64,
        limit: i64,
    ) -> Result<Vec<PersistedDiff>, StoreError> {
        self.diffs_with_status(DiffStatus::Unrecognized, min_id, limit)
    }

    fn pending_diffs(&self, min_id: i64, limit: i64) -> Result<Vec<PersistedDiff>, StoreError> {
        self.diffs_with_status(DiffStatus::Pending, min_id, limit)
    }

    fn first_diff_id_for_block_height(
        &self,
        block_height: BlockNumber,
    ) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        storage_diff::table
            .filter(storage_diff::block_height.ge(block_height))
            .order(storage_diff::id.asc())
            .select(storage_diff::id)
            .first(&mut conn)
            .optional()
            .map_err(store_error)?
            .ok_or(StoreError::NotFound)
    }

    fn mark_transformed(&self, id: i64) -> Result<(), StoreError> {
        self.update_status(id, DiffStatus::Transformed)
    }

    fn mark_pending(&self, id: i64) -> Result<(), StoreError> {
        self.update_status(id, DiffStatus::Pending)
    }

    fn mark_noncanonical(&self, id: i64) -> Result<(), StoreError> {
        self.update_status(id, DiffStatus::Noncanonical)
    }

    fn mark_unrecognized(&self, id: i64) -> Result<(), StoreError> {
        self.update_status(id, DiffStatus::Unrecognized)
    }

    fn mark_unwatched(&self, id: i64) -> Result<(), StoreError> {
        self.update_status(id, DiffStatus::Unwatched)
    }

    fn mark_noncanonical_diffs_as_new(
        &self,
        block_height: BlockNumber,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        update(
            storage_diff::table
                .filter(storage_diff::status.eq(DiffStatus::Noncanonical.as_str()))
                .filter(storage_diff::block_height.eq(block_height)),
        )
        .set(storage_diff::status.eq(DiffStatus::New.as_str()))
        .execute(&mut conn)
        .map_err(store_error)?;
        Ok(())
    }
}
