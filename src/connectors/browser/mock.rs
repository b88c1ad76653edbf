use super::{BrowserConnector, BrowserError, BrowserHandle, PageHandle};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// What every page opened by the mock does
#[derive(Debug, Clone)]
pub enum MockPage {
    Text(String),
    NavigationFails(String),
    /// `goto` never completes
    Hangs,
}

pub struct MockBrowserConnector {
    page: MockPage,
    fail_launch: bool,
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl MockBrowserConnector {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            fail_launch: false,
            launches: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Default for MockBrowserConnector {
    fn default() -> Self {
        Self::new(MockPage::Text("mock page".to_string()))
    }
}

#[async_trait]
impl BrowserConnector for MockBrowserConnector {
    async fn launch(&self) -> Result<Box<dyn BrowserHandle>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(BrowserError::Launch("No usable sandbox".to_string()));
        }

        Ok(Box::new(MockBrowser {
            page: self.page.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct MockBrowser {
    page: MockPage,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserHandle for MockBrowser {
    async fn new_page(&mut self) -> Result<Box<dyn PageHandle>, BrowserError> {
        Ok(Box::new(MockPageHandle {
            page: self.page.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockPageHandle {
    page: MockPage,
}

#[async_trait]
impl PageHandle for MockPageHandle {
    async fn goto(&self, _url: &Url) -> Result<(), BrowserError> {
        match &self.page {
            MockPage::Text(_) => Ok(()),
            MockPage::NavigationFails(message) => Err(BrowserError::Navigation(message.clone())),
            MockPage::Hangs => futures::future::pending().await,
        }
    }

    async fn inner_text(&self) -> Result<String, BrowserError> {
        match &self.page {
            MockPage::Text(text) => Ok(text.clone()),
            _ => Err(BrowserError::Evaluation("page has no body".to_string())),
        }
    }
}
