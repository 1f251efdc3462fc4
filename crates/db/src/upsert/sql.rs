use unisync_common::error::{UnisyncError, UnisyncResult};

use super::{ColumnValue, Row, TableRef, UpsertPolicy};

/// Longest identifier Postgres keeps without truncation.
const MAX_IDENT_LEN: usize = 63;

pub fn validate_ident(name: &str) -> UnisyncResult<()> {
    if name.is_empty() || name.len() > MAX_IDENT_LEN || name.contains('\0') {
        return Err(UnisyncError::Validation(format!(
            "invalid identifier '{}'",
            name.escape_default()
        )));
    }
    Ok(())
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_name(table: &TableRef) -> String {
    match &table.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&table.name)),
        None => quote_ident(&table.name),
    }
}

fn column_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `insert ... on conflict (pk) do update` for `rows`, returning the SQL and
/// the values to bind in placeholder order. `null` and `now()` are inlined so
/// they take the column's type.
/// SQL rendering of [`super::merge::shallow_merge`]: only two objects are
/// merged key-wise, a null incoming value keeps the stored one, anything
/// else replaces it.
fn shallow_merge_expr(q: &str) -> String {
    format!(
        "case when excluded.{q} is null or jsonb_typeof(excluded.{q}) = 'null' then t.{q} \
         when jsonb_typeof(t.{q}) = 'object' and jsonb_typeof(excluded.{q}) = 'object' \
         then t.{q} || excluded.{q} \
         else excluded.{q} end"
    )
}

pub fn build_upsert<'a>(
    table: &TableRef,
    rows: &[&'a Row],
    policy: &UpsertPolicy,
) -> (String, Vec<&'a ColumnValue>) {
    let columns: Vec<&str> = rows
        .first()
        .map(|r| r.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut binds: Vec<&ColumnValue> = Vec::new();
    let mut tuples: Vec<String> = Vec::with_capacity(rows.len());
    for row in rows {
        let values: Vec<String> = row
            .values()
            .map(|value| match value {
                ColumnValue::Null => "null".to_string(),
                ColumnValue::Now => "now()".to_string(),
                other => {
                    binds.push(other);
                    format!("${}", binds.len())
                }
            })
            .collect();
        tuples.push(format!("({})", values.join(", ")));
    }

    let assignments: Vec<String> = columns
        .iter()
        .filter(|c| !table.primary_key.iter().any(|pk| pk == *c) && !policy.is_insert_only(c))
        .map(|c| {
            let q = quote_ident(c);
            if policy.is_shallow_merge(c) {
                format!("{q} = {}", shallow_merge_expr(&q))
            } else {
                format!("{q} = excluded.{q}")
            }
        })
        .collect();

    let pk: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
    let conflict_action = if assignments.is_empty() {
        "do nothing".to_string()
    } else {
        format!("do update set {}", assignments.join(", "))
    };

    let sql = format!(
        "insert into {} as t ({}) values {} on conflict ({}) {}",
        qualified_name(table),
        column_list(&columns),
        tuples.join(", "),
        column_list(&pk),
        conflict_action
    );
    (sql, binds)
}

/// Lock and read the current version of the rows addressed by `rows`' keys.
pub fn build_select_existing<'a>(
    table: &TableRef,
    rows: &[&'a Row],
) -> (String, Vec<&'a ColumnValue>) {
    let mut binds: Vec<&ColumnValue> = Vec::new();
    let mut tuples: Vec<String> = Vec::with_capacity(rows.len());
    for row in rows {
        let placeholders: Vec<String> = table
            .primary_key
            .iter()
            .filter_map(|c| row.get(c))
            .map(|value| {
                binds.push(value);
                format!("${}", binds.len())
            })
            .collect();
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    let pk: Vec<&str> = table.primary_key.iter().map(String::as_str).collect();
    let sql = format!(
        "select to_jsonb(t) as row from {} as t where ({}) in ({}) for update",
        qualified_name(table),
        column_list(&pk),
        tuples.join(", ")
    );
    (sql, binds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, ColumnValue)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("crm_contact"), "\"crm_contact\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        let t = TableRef::new("crm_contact", &["id"]).in_schema(Some("tenant".into()));
        assert_eq!(qualified_name(&t), "\"tenant\".\"crm_contact\"");
    }

    #[test]
    fn rejects_bad_identifiers() {
        assert!(validate_ident("").is_err());
        assert!(validate_ident("a\0b").is_err());
        assert!(validate_ident(&"x".repeat(64)).is_err());
        assert!(validate_ident("crm_sequence_state").is_ok());
    }

    #[test]
    fn upsert_sql_applies_column_policies() {
        let table = TableRef::new("sync_state", &["customer_id", "provider_name"]);
        let r = row(&[
            ("customer_id", ColumnValue::text("c")),
            ("provider_name", ColumnValue::text("p")),
            ("created_at", ColumnValue::Now),
            ("state", ColumnValue::Json(serde_json::json!({}))),
            ("updated_at", ColumnValue::Now),
        ]);
        let policy = UpsertPolicy::new()
            .insert_only(&["created_at"])
            .shallow_merge_json(&["state"]);

        let (sql, binds) = build_upsert(&table, &[&r], &policy);

        assert_eq!(binds.len(), 3);
        assert!(sql.starts_with(
            "insert into \"sync_state\" as t (\"created_at\", \"customer_id\", \"provider_name\", \"state\", \"updated_at\") values (now(), $1, $2, $3, now())"
        ));
        assert!(sql.contains("on conflict (\"customer_id\", \"provider_name\") do update set"));
        assert!(sql.contains(
            "\"state\" = case when excluded.\"state\" is null or jsonb_typeof(excluded.\"state\") = 'null' then t.\"state\" \
             when jsonb_typeof(t.\"state\") = 'object' and jsonb_typeof(excluded.\"state\") = 'object' \
             then t.\"state\" || excluded.\"state\" \
             else excluded.\"state\" end"
        ));
        assert!(sql.contains("\"updated_at\" = excluded.\"updated_at\""));
        assert!(!sql.contains("\"created_at\" = "));
        assert!(!sql.contains("\"customer_id\" = "));
    }

    #[test]
    fn upsert_sql_numbers_placeholders_across_rows_and_inlines_null() {
        let table = TableRef::new("t", &["id"]);
        let a = row(&[("id", ColumnValue::text("1")), ("v", ColumnValue::Null)]);
        let b = row(&[("id", ColumnValue::text("2")), ("v", ColumnValue::Int(5))]);

        let (sql, binds) = build_upsert(&table, &[&a, &b], &UpsertPolicy::new());
        assert!(sql.contains("values ($1, null), ($2, $3)"));
        assert_eq!(binds, vec![&ColumnValue::text("1"), &ColumnValue::text("2"), &ColumnValue::Int(5)]);
    }

    #[test]
    fn upsert_sql_does_nothing_when_no_column_is_updatable() {
        let table = TableRef::new("t", &["id"]);
        let r = row(&[("id", ColumnValue::text("1")), ("created_at", ColumnValue::Now)]);
        let policy = UpsertPolicy::new().insert_only(&["created_at"]);
        let (sql, _) = build_upsert(&table, &[&r], &policy);
        assert!(sql.ends_with("on conflict (\"id\") do nothing"));
    }

    #[test]
    fn select_existing_binds_key_tuples() {
        let table = TableRef::new("crm_contact", &["customer_id", "id"]);
        let a = row(&[("customer_id", ColumnValue::text("c")), ("id", ColumnValue::text("1"))]);
        let b = row(&[("customer_id", ColumnValue::text("c")), ("id", ColumnValue::text("2"))]);
        let (sql, binds) = build_select_existing(&table, &[&a, &b]);
        assert_eq!(
            sql,
            "select to_jsonb(t) as row from \"crm_contact\" as t where (\"customer_id\", \"id\") in (($1, $2), ($3, $4)) for update"
        );
        assert_eq!(binds.len(), 4);
    }
}
