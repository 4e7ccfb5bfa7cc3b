mod query_lifecycle;
mod support;
