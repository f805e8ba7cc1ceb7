#![allow(dead_code)]

pub mod requests {
    use brrtbind::{RequestAdapter, SimpleRequest};
    use http::Method;
    use std::sync::Arc;

    pub fn get(path: &str) -> SimpleRequest {
        SimpleRequest::new(Method::GET, path)
    }

    pub fn post(path: &str, body: serde_json::Value) -> SimpleRequest {
        SimpleRequest::new(Method::POST, path).with_body(body)
    }

    /// `GET /` with the given query pairs.
    pub fn query(pairs: &[(&str, &str)]) -> Arc<dyn RequestAdapter> {
        pairs
            .iter()
            .fold(get("/"), |req, (k, v)| req.with_query(k, *v))
            .into_adapter()
    }
}

pub mod fields {
    use brrtbind::Field;

    pub fn query() -> Field {
        Field::query().build().unwrap()
    }

    pub fn header() -> Field {
        Field::header().build().unwrap()
    }
}

pub mod recorder {
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Shared, ordered log of events observed by test callables.
    #[derive(Clone, Default)]
    pub struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        pub fn count(&self, event: &str) -> usize {
            self.events.lock().iter().filter(|e| *e == event).count()
        }
    }
}

pub mod test_tracing {
    use tracing_subscriber::layer::SubscriberExt;

    /// Installs a test-writer subscriber for the current thread.
    pub fn init() -> tracing::subscriber::DefaultGuard {
        let subscriber =
            tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_test_writer());
        tracing::subscriber::set_default(subscriber)
    }
}
