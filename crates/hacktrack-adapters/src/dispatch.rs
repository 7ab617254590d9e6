use hacktrack_core::NormalizedRecord;
use hacktrack_storage::Fetch;
use tracing::{debug, info, warn};

use crate::datapackage::DataPackageAdapter;
use crate::forge::{ForgeAdapter, ForgeHost};
use crate::web::{
    CodiMdAdapter, DokuWikiAdapter, EtherpadAdapter, GoogleDocAdapter, InstructablesAdapter,
};
use crate::{AdapterContext, AdapterError, FetchedPage, Probe, SourceAdapter};

/// Picks the adapter for a reference URL and runs it.
///
/// Reference adapters are matched on the URL alone, with no request. Page adapters
/// are tried in registration order against a single exploratory fetch, first match wins.
pub struct Dispatcher {
    ctx: AdapterContext,
    reference_adapters: Vec<Box<dyn SourceAdapter>>,
    page_adapters: Vec<Box<dyn SourceAdapter>>,
}

impl Dispatcher {
    pub fn empty(ctx: AdapterContext) -> Self {
        Self {
            ctx,
            reference_adapters: Vec::new(),
            page_adapters: Vec::new(),
        }
    }

    /// All built-in adapters, with one forge adapter per configured host.
    pub fn with_forges(ctx: AdapterContext, forges: &[ForgeHost]) -> Self {
        let mut dispatcher = Self::empty(ctx);
        for host in forges {
            dispatcher.register_reference(ForgeAdapter::new(host.clone()));
        }
        dispatcher
            .register_reference(DataPackageAdapter)
            .register_page(GoogleDocAdapter)
            .register_page(CodiMdAdapter)
            .register_page(DokuWikiAdapter)
            .register_page(EtherpadAdapter)
            .register_page(InstructablesAdapter);
        dispatcher
    }

    pub fn standard(ctx: AdapterContext) -> Self {
        Self::with_forges(ctx, &ForgeHost::builtin())
    }

    pub fn register_reference(&mut self, adapter: impl SourceAdapter + 'static) -> &mut Self {
        self.reference_adapters.push(Box::new(adapter));
        self
    }

    pub fn register_page(&mut self, adapter: impl SourceAdapter + 'static) -> &mut Self {
        self.page_adapters.push(Box::new(adapter));
        self
    }

    pub fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    pub async fn try_get_project_data(
        &self,
        http: &dyn Fetch,
        reference: &str,
    ) -> Result<NormalizedRecord, AdapterError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AdapterError::NotFound("empty reference".to_string()));
        }

        let probe = Probe::Reference(reference);
        if let Some(adapter) = self.reference_adapters.iter().find(|a| a.detect(&probe)) {
            debug!(kind = %adapter.kind(), reference, "matched by url");
            return adapter.fetch(http, &self.ctx, &probe).await;
        }

        let response = http.get(reference).await?;
        let page = FetchedPage::new(reference, response.text());
        let probe = Probe::Page(&page);
        let Some(adapter) = self.page_adapters.iter().find(|a| a.detect(&probe)) else {
            return Err(AdapterError::NotFound(reference.to_string()));
        };
        debug!(kind = %adapter.kind(), reference, "matched by content");
        adapter.fetch(http, &self.ctx, &probe).await
    }

    /// Every failure degrades to `None` after logging.
    pub async fn get_project_data(
        &self,
        http: &dyn Fetch,
        reference: &str,
    ) -> Option<NormalizedRecord> {
        match self.try_get_project_data(http, reference).await {
            Ok(record) if !record.is_empty() => Some(record),
            Ok(_) => None,
            Err(err) if err.is_network() => {
                warn!(reference, error = %err, "could not connect");
                None
            }
            Err(err) => {
                info!(reference, error = %err, "no project data");
                None
            }
        }
    }
}
