//! stats_mysql_processlist collection.

use std::collections::BTreeMap;

use crate::admin::Row;
use crate::registry::TableRegistry;
use crate::sample::MetricSample;

use super::{Emitter, FieldError, ScrapeError, resolve};

/// (column, registry key, label key) for each host list.
const HOST_FIELDS: [(&str, &str, &str); 2] = [
    ("cli_host", "client_connection_list", "client_host"),
    ("srv_host", "server_connection_list", "server_host"),
];

/// Emits one presence sample (value 1) per non-empty host per session.
///
/// All client hosts are emitted before any server host. Hosts are not
/// deduplicated: a host with several sessions produces several samples with
/// the same labels.
pub(super) async fn scrape_connection_list(
    rows: &[Row],
    registry: &TableRegistry,
    emitter: &mut Emitter<'_>,
) -> Result<(), ScrapeError> {
    for _ in rows {
        emitter.row();
    }

    for (column, key, label) in HOST_FIELDS {
        let descriptor = match resolve(registry, key) {
            Ok(Some(d)) => d,
            Ok(None) => continue,
            Err(e) => {
                emitter.skip(e);
                continue;
            }
        };
        for row in rows {
            let Some(host) = row.get(column) else {
                emitter.skip(FieldError::MissingField {
                    field: column.to_string(),
                });
                continue;
            };
            if host.is_empty() {
                continue;
            }
            let labels = BTreeMap::from([(label.to_string(), host.to_string())]);
            emitter
                .emit(MetricSample::new(descriptor.clone(), labels, 1.0))
                .await?;
        }
    }
    Ok(())
}
