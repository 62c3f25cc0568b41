use diesel::{insert_into, ExpressionMethods, RunQueryDsl};

use delver::components::store::StoreError;
use delver::components::ethereum::NodeInfo;

use crate::schema::eth_nodes;
use crate::{store_error, ConnectionPool};

/// Register the node this indexer is attached to, returning the id used
/// to scope headers and diffs. Re-running against a known node returns
/// the existing row.
pub fn ensure_eth_node(pool: &ConnectionPool, info: &NodeInfo) -> Result<i64, StoreError> {
    let mut conn = pool.get()?;
    insert_into(eth_nodes::table)
        .values((
            eth_nodes::client_name.eq(&info.client_name),
            eth_nodes::network_id.eq(&info.network_id),
        ))
        .on_conflict((eth_nodes::client_name, eth_nodes::network_id))
        // No-op update so the statement returns the existing id on
        // conflict.
        .do_update()
        .set(eth_nodes::client_name.eq(&info.client_name))
        .returning(eth_nodes::id)
        .get_result(&mut conn)
        .map_err(store_error)
}
