//! Lazy, single-flight classifier loading.
//!
//! Model load is slow (weights from disk, runtime init), so it happens at
//! most once per process: the first caller loads while holding the slot
//! lock, concurrent callers block on that same lock and then reuse the
//! loaded instance. A failed load leaves the slot empty — the next pipeline
//! run retries instead of caching the failure.

use std::sync::{Arc, Mutex};

use tracing::info;

use super::detector::{Classifier, ClassifierError};

/// Produces the classifier instance on first use.
pub trait ClassifierLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn Classifier>, ClassifierError>;
}

/// Process-scoped owner of the lazily-loaded classifier.
pub struct ClassifierService {
    loader: Box<dyn ClassifierLoader>,
    slot: Mutex<Option<Arc<dyn Classifier>>>,
}

impl ClassifierService {
    pub fn new(loader: Box<dyn ClassifierLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
        }
    }

    /// Get the loaded classifier, loading it on first call.
    ///
    /// The slot lock is held for the duration of the load, so a second
    /// caller arriving mid-load waits for the same load instead of starting
    /// another one.
    pub fn ensure_loaded(&self) -> Result<Arc<dyn Classifier>, ClassifierError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| ClassifierError::Load("classifier slot lock poisoned".into()))?;

        if let Some(classifier) = slot.as_ref() {
            return Ok(Arc::clone(classifier));
        }

        let classifier = self.loader.load()?;
        info!("On-device classifier loaded");
        *slot = Some(Arc::clone(&classifier));
        Ok(classifier)
    }

    /// Whether a classifier instance is already resident.
    pub fn is_loaded(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Drop the resident instance (frees model memory; next call reloads).
    pub fn unload(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Loaders
// ═══════════════════════════════════════════════════════════

/// Loader for builds without an on-device model: always fails, which the
/// gate converts into a pass-through verdict.
pub struct UnavailableLoader;

impl ClassifierLoader for UnavailableLoader {
    fn load(&self) -> Result<Arc<dyn Classifier>, ClassifierError> {
        Err(ClassifierError::Load(
            "no on-device classifier in this build".into(),
        ))
    }
}

/// Loader wrapping a pre-built instance (tests, embedders with their own
/// model management).
pub struct PrebuiltLoader {
    classifier: Arc<dyn Classifier>,
}

impl PrebuiltLoader {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

impl ClassifierLoader for PrebuiltLoader {
    fn load(&self) -> Result<Arc<dyn Classifier>, ClassifierError> {
        Ok(Arc::clone(&self.classifier))
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::detector::{MockClassifier, Prediction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        fail_first: AtomicUsize,
    }

    impl CountingLoader {
        fn new(loads: Arc<AtomicUsize>, failures_before_success: usize) -> Self {
            Self {
                loads,
                fail_first: AtomicUsize::new(failures_before_success),
            }
        }
    }

    impl ClassifierLoader for CountingLoader {
        fn load(&self) -> Result<Arc<dyn Classifier>, ClassifierError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(ClassifierError::Load("simulated".into()));
            }
            Ok(Arc::new(MockClassifier::with_predictions(vec![(
                "pizza", 0.9,
            )])))
        }
    }

    #[test]
    fn loads_once_and_reuses() {
        let loads = Arc::new(AtomicUsize::new(0));
        let service = ClassifierService::new(Box::new(CountingLoader::new(loads.clone(), 0)));

        assert!(!service.is_loaded());
        let a = service.ensure_loaded().unwrap();
        let b = service.ensure_loaded().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(service.is_loaded());
    }

    #[test]
    fn concurrent_callers_share_one_load() {
        let loads = Arc::new(AtomicUsize::new(0));
        let service = Arc::new(ClassifierService::new(Box::new(CountingLoader::new(
            loads.clone(),
            0,
        ))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || service.ensure_loaded().map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_retries_next_call() {
        let loads = Arc::new(AtomicUsize::new(0));
        let service = ClassifierService::new(Box::new(CountingLoader::new(loads.clone(), 1)));

        assert!(service.ensure_loaded().is_err());
        assert!(!service.is_loaded());

        let classifier = service.ensure_loaded().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        let preds: Vec<Prediction> = classifier.classify(b"x", 3).unwrap();
        assert_eq!(preds[0].label, "pizza");
    }

    #[test]
    fn unload_forces_reload() {
        let loads = Arc::new(AtomicUsize::new(0));
        let service = ClassifierService::new(Box::new(CountingLoader::new(loads.clone(), 0)));

        service.ensure_loaded().unwrap();
        service.unload();
        assert!(!service.is_loaded());
        service.ensure_loaded().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unavailable_loader_always_fails() {
        let service = ClassifierService::new(Box::new(UnavailableLoader));
        assert!(matches!(
            service.ensure_loaded(),
            Err(ClassifierError::Load(_))
        ));
    }

    #[test]
    fn prebuilt_loader_returns_instance() {
        let instance: Arc<dyn Classifier> =
            Arc::new(MockClassifier::with_predictions(vec![("soup", 0.8)]));
        let service = ClassifierService::new(Box::new(PrebuiltLoader::new(instance)));
        let classifier = service.ensure_loaded().unwrap();
        assert_eq!(classifier.classify(b"x", 1).unwrap()[0].label, "soup");
    }
}
