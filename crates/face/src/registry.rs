//! Scheme-keyed registry of protocol factories

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};

use ndn_lora_core::uri_scheme;

use crate::error::{FaceError, Result};
use crate::face::{CreateFaceRequest, Face};

/// Flat `key = value` view of a face_system configuration section.
pub type ConfigSection = BTreeMap<String, String>;

/// Listening endpoint that owns faces.
pub trait Channel: Send + Sync {
    fn uri(&self) -> String;

    fn is_listening(&self) -> bool;

    /// Number of faces owned by the channel.
    fn size(&self) -> usize;
}

#[async_trait]
pub trait ProtocolFactory: Send + Sync {
    fn id(&self) -> &'static str;

    fn provided_schemes(&self) -> Vec<&'static str>;

    async fn create_face(&self, request: &CreateFaceRequest) -> Result<Arc<Face>>;

    async fn list_channels(&self) -> Vec<Arc<dyn Channel>>;

    fn process_config(&self, section: Option<&ConfigSection>) -> Result<()>;
}

#[derive(Default)]
pub struct FactoryRegistry {
    factories: BTreeMap<&'static str, Arc<dyn ProtocolFactory>>,
    schemes: HashMap<&'static str, &'static str>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ProtocolFactory>) -> Result<()> {
        let schemes = factory.provided_schemes();
        if let Some(taken) = schemes.iter().find(|s| self.schemes.contains_key(*s)) {
            return Err(FaceError::SchemeTaken(taken.to_string()));
        }

        let id = factory.id();
        for scheme in schemes {
            self.schemes.insert(scheme, id);
        }
        info!("Registered protocol factory {}", id);
        self.factories.insert(id, factory);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProtocolFactory>> {
        self.factories.get(id).cloned()
    }

    pub fn for_scheme(&self, scheme: &str) -> Option<Arc<dyn ProtocolFactory>> {
        self.schemes.get(scheme).and_then(|id| self.get(id))
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// Routes the request to the factory providing the URI's scheme.
    /// Every failure ends up in `on_failure`.
    pub async fn create_face<C, F>(&self, request: &CreateFaceRequest, on_created: C, on_failure: F)
    where
        C: FnOnce(Arc<Face>) + Send,
        F: FnOnce(u32, String) + Send,
    {
        let factory = uri_scheme(&request.remote_uri).and_then(|scheme| self.for_scheme(scheme));
        let result = match factory {
            Some(factory) => factory.create_face(request).await,
            None => Err(FaceError::UnsupportedScheme(request.remote_uri.clone())),
        };

        match result {
            Ok(face) => on_created(face),
            Err(e) => {
                error!("Face creation for {} failed: {}", request.remote_uri, e);
                on_failure(e.code(), e.to_string());
            }
        }
    }

    pub async fn list_channels(&self) -> Vec<Arc<dyn Channel>> {
        let mut channels = Vec::new();
        for factory in self.factories.values() {
            channels.extend(factory.list_channels().await);
        }
        channels
    }

    pub fn process_config(&self, sections: &BTreeMap<String, ConfigSection>) -> Result<()> {
        for (id, factory) in &self.factories {
            debug!("Processing face_system.{} section", id);
            factory.process_config(sections.get(*id))?;
        }
        Ok(())
    }
}
