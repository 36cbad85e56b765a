//! stats_mysql_connection_pool collection.

use crate::admin::Row;
use crate::coerce::{self, Coerced};
use crate::registry::TableRegistry;
use crate::sample::MetricSample;

use super::{Emitter, FieldError, ScrapeError, resolve};

/// Maps connection pool rows. Each row describes one backend: `hostgroup` and
/// `endpoint` labels are built once, then every registered column becomes a
/// sample sharing them, in column order. A column hitting a placeholder
/// registration fails the whole row.
pub(super) async fn scrape_connection_pool(
    rows: &[Row],
    registry: &TableRegistry,
    emitter: &mut Emitter<'_>,
) -> Result<(), ScrapeError> {
    for row in rows {
        emitter.row();

        let (hostgroup, host, port) =
            match (row.get("hostgroup"), row.get("srv_host"), row.get("srv_port")) {
                (Some(hg), Some(host), Some(port)) => (hg, host, port),
                (hg, host, _) => {
                    let missing = if hg.is_none() {
                        "hostgroup"
                    } else if host.is_none() {
                        "srv_host"
                    } else {
                        "srv_port"
                    };
                    emitter.skip(FieldError::MissingField {
                        field: missing.to_string(),
                    });
                    continue;
                }
            };
        let labels = coerce::pool_labels(hostgroup, host, port);

        // Resolve every column first so a placeholder fails the row before
        // any of its samples are sent.
        let mut fields = Vec::with_capacity(row.len());
        let mut failed = None;
        for (field, raw) in row.iter() {
            if coerce::is_label_field(field) {
                continue;
            }
            match resolve(registry, field) {
                Ok(Some(descriptor)) => fields.push((field, raw, descriptor)),
                Ok(None) => {}
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failed {
            emitter.skip(e);
            continue;
        }

        for (field, raw, descriptor) in fields {
            match coerce::parse(field, raw) {
                Ok(Coerced::Value(value)) => {
                    emitter
                        .emit(MetricSample::new(descriptor, labels.clone(), value))
                        .await?
                }
                Ok(Coerced::Label) => {}
                Err(e) => emitter.skip(e.into()),
            }
        }
    }
    Ok(())
}
