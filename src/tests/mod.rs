//! Общие тестовые помощники и сквозные тесты конвейера

pub(crate) mod support;

mod pipeline;
