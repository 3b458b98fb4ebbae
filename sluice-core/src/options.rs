use crate::{IsolationLevel, SchemaTranslateMap};

/// Per connection or per statement execution options.
///
/// Statement options are merged over the connection ones, `None` inherits.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    /// `Some(true)` asks for a server side cursor, `Some(false)` forbids one.
    pub stream_results: Option<bool>,
    pub schema_translate_map: Option<SchemaTranslateMap>,
    /// Sends statements without parameters through `do_execute_no_params`.
    pub no_parameters: Option<bool>,
    pub isolation_level: Option<IsolationLevel>,
}

impl ExecutionOptions {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn stream_results(mut self, stream_results: bool) -> Self {
        self.stream_results = Some(stream_results);
        self
    }
    pub fn schema_translate_map(mut self, map: SchemaTranslateMap) -> Self {
        self.schema_translate_map = Some(map);
        self
    }
    pub fn no_parameters(mut self, no_parameters: bool) -> Self {
        self.no_parameters = Some(no_parameters);
        self
    }
    pub fn isolation_level(mut self, isolation_level: IsolationLevel) -> Self {
        self.isolation_level = Some(isolation_level);
        self
    }

    /// Options of `self` overridden by the ones set in `other`.
    pub fn merge(&self, other: &ExecutionOptions) -> ExecutionOptions {
        ExecutionOptions {
            stream_results: other.stream_results.or(self.stream_results),
            schema_translate_map: other
                .schema_translate_map
                .clone()
                .or_else(|| self.schema_translate_map.clone()),
            no_parameters: other.no_parameters.or(self.no_parameters),
            isolation_level: other
                .isolation_level
                .clone()
                .or_else(|| self.isolation_level.clone()),
        }
    }
}
