// tests/property/main.rs

mod backoff;
mod dag_order;
