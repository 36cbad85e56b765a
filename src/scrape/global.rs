//! stats_mysql_global collection.

use crate::admin::Row;
use crate::coerce;
use crate::registry::TableRegistry;
use crate::sample::MetricSample;

use super::{Emitter, FieldError, ScrapeError, resolve};

/// Maps `stats_mysql_global` rows. Each row is one (name, value) pair taken
/// from its first two columns; unregistered names are skipped.
pub(super) async fn scrape_global_status(
    rows: &[Row],
    registry: &TableRegistry,
    emitter: &mut Emitter<'_>,
) -> Result<(), ScrapeError> {
    for row in rows {
        emitter.row();

        let (name, raw) = match (row.column(0), row.column(1)) {
            (Some((_, name)), Some((_, raw))) => (name, raw),
            (name, _) => {
                let missing = if name.is_none() {
                    "Variable_Name"
                } else {
                    "Variable_Value"
                };
                emitter.skip(FieldError::MissingField {
                    field: missing.to_string(),
                });
                continue;
            }
        };

        let descriptor = match resolve(registry, name) {
            Ok(Some(d)) => d,
            Ok(None) => continue,
            Err(e) => {
                emitter.skip(e);
                continue;
            }
        };

        match coerce::parse_number(name, raw) {
            Ok(value) => emitter.emit(MetricSample::unlabeled(descriptor, value)).await?,
            Err(e) => emitter.skip(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::coerce::CoerceError;
    use crate::mock::MockAdmin;
    use crate::registry::{MetricKind, Registries, TableGroup, TableRegistry};
    use crate::scrape::test_support::run;
    use crate::scrape::{FieldError, GLOBAL_STATUS_QUERY};

    const COLUMNS: &[&str] = &["Variable_Name", "Variable_Value"];

    #[tokio::test]
    async fn test_scrape_global_status() {
        let db = MockAdmin::new().with_rows(
            GLOBAL_STATUS_QUERY,
            COLUMNS,
            &[
                &["Active_Transactions", "3"],
                &["Backend_query_time_nsec", "76355784684851"],
                &["Client_Connections_aborted", "0"],
                &["Client_Connections_connected", "64"],
                &["Client_Connections_created", "1087931"],
                &["Servers_table_version", "2019470"],
            ],
        );
        let registries = Registries::proxysql();
        let (result, samples) = run(TableGroup::GlobalStatus, &db, &registries.global_status).await;

        let summary = result.unwrap();
        assert_eq!(summary.rows, 6);
        assert_eq!(summary.samples, 6);
        assert!(summary.field_errors.is_empty());

        let got: Vec<(&str, MetricKind, f64)> = samples
            .iter()
            .map(|s| (s.name(), s.descriptor.kind, s.value))
            .collect();
        assert_eq!(
            got,
            vec![
                ("proxysql_mysql_status_active_transactions", MetricKind::Gauge, 3.0),
                ("proxysql_mysql_status_backend_query_time_nsec", MetricKind::Counter, 76355784684851.0),
                ("proxysql_mysql_status_client_connections_aborted", MetricKind::Counter, 0.0),
                ("proxysql_mysql_status_client_connections_connected", MetricKind::Gauge, 64.0),
                ("proxysql_mysql_status_client_connections_created", MetricKind::Counter, 1087931.0),
                ("proxysql_mysql_status_servers_table_version", MetricKind::Gauge, 2019470.0),
            ]
        );
        assert!(samples.iter().all(|s| s.labels.is_empty()));
    }

    #[tokio::test]
    async fn test_unregistered_names_are_skipped() {
        let db = MockAdmin::new().with_rows(
            GLOBAL_STATUS_QUERY,
            COLUMNS,
            &[
                &["Questions", "100"],
                &["Some_Future_Variable", "1"],
                &["Slow_queries", "2"],
                &["Another_Unknown", "xyz"],
            ],
        );
        let registries = Registries::proxysql();
        let (result, samples) = run(TableGroup::GlobalStatus, &db, &registries.global_status).await;

        assert!(result.unwrap().field_errors.is_empty());
        let names: Vec<&str> = samples.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "proxysql_mysql_status_questions",
                "proxysql_mysql_status_slow_queries"
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_value_skips_only_that_row() {
        let db = MockAdmin::new().with_rows(
            GLOBAL_STATUS_QUERY,
            COLUMNS,
            &[&["Questions", "lots"], &["Active_Transactions", "3"]],
        );
        let registries = Registries::proxysql();
        let (result, samples) = run(TableGroup::GlobalStatus, &db, &registries.global_status).await;

        assert_eq!(
            result.unwrap().field_errors,
            vec![FieldError::Coerce(CoerceError::MalformedValue {
                field: "Questions".to_string(),
                value: "lots".to_string(),
            })]
        );
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 3.0);
    }

    #[tokio::test]
    async fn test_reduced_registry_omits_metrics() {
        let db = MockAdmin::new().with_rows(
            GLOBAL_STATUS_QUERY,
            COLUMNS,
            &[&["Questions", "100"], &["Active_Transactions", "3"]],
        );
        let registry = TableRegistry::new(TableGroup::GlobalStatus)
            .metric("active_transactions", "active_transactions", MetricKind::Gauge, "help")
            .placeholder("questions");
        let (result, samples) = run(TableGroup::GlobalStatus, &db, &registry).await;

        assert_eq!(
            result.unwrap().field_errors,
            vec![FieldError::Placeholder {
                field: "Questions".to_string()
            }]
        );
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), "proxysql_mysql_status_active_transactions");
    }

    #[tokio::test]
    async fn test_short_rows_name_the_missing_column() {
        let db =
            MockAdmin::new().with_rows(GLOBAL_STATUS_QUERY, &["Variable_Name"], &[&["Questions"]]);
        let registries = Registries::proxysql();
        let (result, samples) = run(TableGroup::GlobalStatus, &db, &registries.global_status).await;
        assert_eq!(
            result.unwrap().field_errors,
            vec![FieldError::MissingField {
                field: "Variable_Value".to_string()
            }]
        );
        assert!(samples.is_empty());

        db.set_rows(GLOBAL_STATUS_QUERY, &[], &[&[]]);
        let (result, samples) = run(TableGroup::GlobalStatus, &db, &registries.global_status).await;
        assert_eq!(
            result.unwrap().field_errors,
            vec![FieldError::MissingField {
                field: "Variable_Name".to_string()
            }]
        );
        assert!(samples.is_empty());
    }
}
