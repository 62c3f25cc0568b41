use std::sync::Arc;

use diesel::dsl::max;
use diesel::sql_types::BigInt;
use diesel::{
    delete, insert_into, ExpressionMethods, OptionalExtension, QueryDsl, QueryableByName,
    RunQueryDsl,
};

use delver::components::store::{HeaderRepository as HeaderRepositoryTrait, StoreError};
use delver::data::header::{BlockHeader, BlockNumber, Header};
use delver::util::hex::{h256_from_hex, h256_to_hex};

use crate::schema::headers;
use crate::{store_error, ConnectionPool};

/// Header storage in `public.headers`, scoped to one `eth_nodes` row so
/// several indexers can share a database.
pub struct HeaderRepository {
    pool: Arc<ConnectionPool>,
    eth_node_id: i64,
}

type HeaderRow = (i64, i64, String, String, serde_json::Value, i64, i64);

fn header_from_row(row: HeaderRow) -> Result<Header, StoreError> {
    let (id, block_number, hash, parent_hash, raw, timestamp, _eth_node_id) = row;
    Ok(Header {
        id,
        block_number,
        hash: h256_from_hex(&hash)?,
        parent_hash: h256_from_hex(&parent_hash)?,
        raw,
        timestamp,
    })
}

impl HeaderRepository {
    pub fn new(pool: Arc<ConnectionPool>, eth_node_id: i64) -> Self {
        HeaderRepository { pool, eth_node_id }
    }
}

impl HeaderRepositoryTrait for HeaderRepository {
    fn create_or_update_header(&self, header: &BlockHeader) -> Result<i64, StoreError> {
        let mut conn = self.pool.get()?;
        insert_into(headers::table)
            .values((
                headers::block_number.eq(header.block_number),
                headers::hash.eq(h256_to_hex(&header.hash)),
                headers::parent_hash.eq(h256_to_hex(&header.parent_hash)),
                headers::raw.eq(&header.raw),
                headers::block_timestamp.eq(header.timestamp),
                headers::eth_node_id.eq(self.eth_node_id),
            ))
            .on_conflict((headers::block_number, headers::eth_node_id))
            .do_update()
            .set((
                headers::hash.eq(h256_to_hex(&header.hash)),
                headers::parent_hash.eq(h256_to_hex(&header.parent_hash)),
                headers::raw.eq(&header.raw),
                headers::block_timestamp.eq(header.timestamp),
            ))
            .returning(headers::id)
            .get_result(&mut conn)
            .map_err(store_error)
    }

    fn header_by_block_number(&self, number: BlockNumber) -> Result<Header, StoreError> {
        let mut conn = self.pool.get()?;
        let row: Option<HeaderRow> = headers::table
            .filter(headers::block_number.eq(number))
            .filter(headers::eth_node_id.eq(self.eth_node_id))
            .first(&mut conn)
            .optional()
            .map_err(store_error)?;
        match row {
            Some(row) => header_from_row(row),
            None => Err(StoreError::HeaderDoesNotExist),
        }
    }

    fn most_recent_header_block_number(&self) -> Result<BlockNumber, StoreError> {
        let mut conn = self.pool.get()?;
        let number: Option<i64> = headers::table
            .filter(headers::eth_node_id.eq(self.eth_node_id))
            .select(max(headers::block_number))
            .first(&mut conn)
            .map_err(store_error)?;
        number.ok_or(StoreError::NotFound)
    }

    fn delete_header(&self, number: BlockNumber) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        delete(
            headers::table
                .filter(headers::block_number.eq(number))
                .filter(headers::eth_node_id.eq(self.eth_node_id)),
        )
        .execute(&mut conn)
        .map_err(store_error)?;
        Ok(())
    }

    fn missing_block_numbers(
        &self,
        start: BlockNumber,
        end: BlockNumber,
    ) -> Result<Vec<BlockNumber>, StoreError> {
        #[derive(QueryableByName)]
        struct MissingBlock {
            #[diesel(sql_type = BigInt)]
            block_number: i64,
        }

        let mut conn = self.pool.get()?;
        let rows: Vec<MissingBlock> = diesel::sql_query(
            "SELECT series.block_number FROM generate_series($1, $2) AS series(block_number) \
             LEFT JOIN public.headers ON headers.block_number = series.block_number \
               AND headers.eth_node_id = $3 \
             WHERE headers.id IS NULL \
             ORDER BY series.block_number",
        )
        .bind::<BigInt, _>(start)
        .bind::<BigInt, _>(end)
        .bind::<BigInt, _>(self.eth_node_id)
        .load(&mut conn)
        .map_err(store_error)?;
        Ok(rows.into_iter().map(|row| row.block_number).collect())
    }

    fn headers_in_range(
        &self,
        start: BlockNumber,
        end: BlockNumber,
    ) -> Result<Vec<Header>, StoreError> {
        let mut conn = self.pool.get()?;
        let rows: Vec<HeaderRow> = headers::table
            .filter(headers::block_number.ge(start))
            .filter(headers::block_number.le(end))
            .filter(headers::eth_node_id.eq(self.eth_node_id))
            .order(headers::block_number.asc())
            .load(&mut conn)
            .map_err(store_error)?;
        rows.into_iter().map(header_from_row).collect()
    }
}
