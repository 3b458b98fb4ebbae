use crate::statement;
use sluice_core::{
    CacheStatus, Connection, Error, ExecutionOptions, SchemaTranslateMap, StatementKind, Value,
};

pub fn schema(connection: &mut Connection) {
    let Some(default_schema) = connection
        .dialect()
        .runtime()
        .default_schema_name()
        .map(ToString::to_string)
    else {
        log::warn!("Skipping schema translation, the dialect has no default schema");
        return;
    };
    let select = statement(connection, StatementKind::Select)
        .sql("SELECT COUNT(*) FROM ")
        .schema(Some("store"))
        .sql(".sl_many")
        .build();

    let explicit = ExecutionOptions::new().schema_translate_map(SchemaTranslateMap::from_iter([(
        Some("store".to_string()),
        Some(default_schema.clone()),
    )]));
    let mut result = connection
        .execute_with(&select, Vec::new(), &explicit, CacheStatus::Miss, None)
        .expect("Failed to run a translated statement");
    assert!(
        result
            .context()
            .statement()
            .contains(&format!("{default_schema}.sl_many"))
    );
    assert!(result.cache_status().starts_with("generated in "));
    assert_eq!(
        result.scalar().expect("Failed to count"),
        Some(Value::Int64(4))
    );
    drop(result);

    // Unset target falls back to the default schema
    let fallback = ExecutionOptions::new().schema_translate_map(SchemaTranslateMap::from_iter([(
        Some("store".to_string()),
        None,
    )]));
    let mut result = connection
        .execute_with(&select, Vec::new(), &fallback, CacheStatus::Hit, None)
        .expect("Failed to run a statement translated to the default schema");
    assert_eq!(
        result.scalar().expect("Failed to count"),
        Some(Value::Int64(4))
    );
    drop(result);

    let unnamed = statement(connection, StatementKind::Select)
        .sql("SELECT COUNT(*) FROM ")
        .schema(None)
        .sql(".sl_many")
        .build();
    let error = connection
        .execute_with(&unnamed, Vec::new(), &explicit, CacheStatus::Miss, None)
        .err()
        .expect("The map has no entry for the unnamed schema");
    assert!(matches!(error, Error::InvalidRequest(..)));
}
