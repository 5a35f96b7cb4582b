//! Наблюдатели прогресса
//!
//! Консольный наблюдатель для CLI и наблюдатель в памяти для тестов
//! и встраивания библиотеки.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::progress::{ProgressInfo, ProgressObserver};

/// Наблюдатель, выводящий прогресс в stderr
#[derive(Debug, Default)]
pub struct ConsoleProgressObserver {
    prefix: Option<String>,
}

impl ConsoleProgressObserver {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn format(&self, progress: &ProgressInfo) -> String {
        let prefix = self.prefix.as_deref().unwrap_or("");
        let details = match progress.details.as_deref() {
            Some(d) if !d.is_empty() => format!(", {}", d),
            _ => String::new(),
        };
        format!(
            "{}[{:>5.1}%] {}: {:.0}%{}",
            prefix, progress.total_progress, progress.step, progress.step_progress, details
        )
    }
}

impl ProgressObserver for ConsoleProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        eprintln!("{}", self.format(&progress));
    }
}

/// Наблюдатель, сохраняющий историю обновлений в памяти
#[derive(Debug, Default, Clone)]
pub struct MemoryProgressObserver {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl MemoryProgressObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Общий доступ к истории, остающийся у вызывающего после передачи наблюдателя
    pub fn handle(&self) -> Arc<Mutex<Vec<ProgressInfo>>> {
        self.history.clone()
    }

    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }
}

impl ProgressObserver for MemoryProgressObserver {
    fn on_progress_update(&self, progress: ProgressInfo) {
        self.history.lock().push(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_format() {
        let observer = ConsoleProgressObserver::with_prefix("[teil1] ");
        let line = observer.format(&ProgressInfo::new("Синтез речи", 50.0, 22.0, Some("3/6".to_string())));
        assert_eq!(line, "[teil1] [ 22.0%] Синтез речи: 50%, 3/6");

        let bare = ConsoleProgressObserver::new().format(&ProgressInfo::new("Сборка", 100.0, 100.0, None));
        assert_eq!(bare, "[100.0%] Сборка: 100%");
    }

    #[test]
    fn test_memory_history() {
        let observer = MemoryProgressObserver::new();
        observer.on_progress_update(ProgressInfo::new("a", 10.0, 1.0, None));
        observer.on_progress_update(ProgressInfo::new("b", 120.0, 2.0, None));
        let history = observer.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].step_progress, 100.0);
        observer.clear_history();
        assert!(observer.handle().lock().is_empty());
    }
}
