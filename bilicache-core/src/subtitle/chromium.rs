use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{expand_home, BrowserSection, SubtitleSection};

use super::error::{SubtitleError, SubtitleResult};
use super::page::{PageOutcome, SubtitlePage, SubtitlePageFactory};

/// Launches one Chromium instance per page.
#[derive(Debug, Clone)]
pub struct ChromiumPageFactory {
    browser: BrowserSection,
    subtitle: SubtitleSection,
}

impl ChromiumPageFactory {
    pub fn new(browser: BrowserSection, subtitle: SubtitleSection) -> Self {
        Self { browser, subtitle }
    }

    /// Extra command line switches passed to Chromium.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec![format!(
            "--window-size={},{}",
            self.browser.window_width, self.browser.window_height
        )];
        if self.browser.disable_images {
            args.push("--blink-settings=imagesEnabled=false".into());
        }
        args.push("--no-first-run".into());
        args.push("--password-store=basic".into());
        args
    }

    fn build_chromium_config(&self) -> SubtitleResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder()
            .window_size(self.browser.window_width, self.browser.window_height);

        if let Some(path) = &self.browser.executable_path {
            builder = builder.chrome_executable(expand_home(path));
        }
        if !self.browser.headless {
            builder = builder.with_head();
        }
        if !self.browser.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = self.browser.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }
        if let Some(dir) = &self.browser.extension_dir {
            info!(dir = %dir, "loading browser extension");
            builder = builder.extension(expand_home(dir).to_string_lossy().to_string());
        }

        builder
            .args(self.launch_args())
            .build()
            .map_err(SubtitleError::Configuration)
    }
}

#[async_trait(?Send)]
impl SubtitlePageFactory for ChromiumPageFactory {
    async fn create(&self) -> SubtitleResult<Box<dyn SubtitlePage>> {
        let config = self.build_chromium_config()?;
        info!(headless = self.browser.headless, "launching Chromium instance");

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| SubtitleError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = match browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await
        {
            Ok(page) => page,
            Err(err) => {
                warn!(error = %err, "cannot open a tab, closing Chromium");
                shutdown(Some(browser), Some(handler_task)).await;
                return Err(err.into());
            }
        };
        Ok(Box::new(ChromiumSubtitlePage {
            browser: Mutex::new(Some(browser)),
            handler_task: Mutex::new(Some(handler_task)),
            page,
            options: self.subtitle.clone(),
        }))
    }
}

pub struct ChromiumSubtitlePage {
    browser: Mutex<Option<Browser>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    page: Page,
    options: SubtitleSection,
}

impl ChromiumSubtitlePage {
    /// Script classifying the current page state as `results`, `absent` or
    /// `pending`.
    fn probe_script(&self) -> String {
        let results = js_string(&self.options.results_selector);
        let absence = js_string(&self.options.absence_selector);
        let wanted = match &self.options.results_text {
            Some(text) => js_string(text),
            None => "null".to_string(),
        };
        format!(
            r#"(() => {{
    const wanted = {wanted};
    const hit = Array.from(document.querySelectorAll({results}))
        .some((el) => wanted === null || (el.textContent || '').includes(wanted));
    if (hit) return 'results';
    if (document.querySelector({absence})) return 'absent';
    return 'pending';
}})()"#
        )
    }
}

#[async_trait(?Send)]
impl SubtitlePage for ChromiumSubtitlePage {
    async fn open(&self) -> SubtitleResult<()> {
        debug!(url = %self.options.page_url, "opening subtitle page");
        let params = NavigateParams::builder()
            .url(self.options.page_url.as_str())
            .build()
            .map_err(SubtitleError::Configuration)?;
        self.page.goto(params).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn submit(&self, source_url: &str) -> SubtitleResult<()> {
        self.page
            .find_element(self.options.input_selector.as_str())
            .await?
            .click()
            .await?
            .type_str(source_url)
            .await?;
        self.page
            .find_element(self.options.submit_selector.as_str())
            .await?
            .click()
            .await?;
        Ok(())
    }

    async fn wait_for_outcome(&self, timeout: Duration) -> SubtitleResult<PageOutcome> {
        let script = self.probe_script();
        let deadline = Instant::now() + timeout;
        loop {
            match self.page.evaluate(script.as_str()).await {
                Ok(result) => match result.into_value::<String>() {
                    Ok(state) if state == "results" => return Ok(PageOutcome::Results),
                    Ok(state) if state == "absent" => return Ok(PageOutcome::Absent),
                    Ok(_) => {}
                    Err(err) => debug!(error = %err, "unexpected probe result"),
                },
                Err(err) => debug!(error = %err, "probe failed, page still loading"),
            }
            if Instant::now() >= deadline {
                return Ok(PageOutcome::TimedOut);
            }
            sleep(self.options.poll_interval()).await;
        }
    }

    async fn read_payload(&self) -> SubtitleResult<Option<String>> {
        let result = self
            .page
            .evaluate(self.options.payload_script.as_str())
            .await?;
        Ok(result
            .value()
            .and_then(|value| value.as_str())
            .map(str::to_string))
    }

    async fn close(&self) -> SubtitleResult<()> {
        let browser = self.browser.lock().ok().and_then(|mut guard| guard.take());
        let handle = self
            .handler_task
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        shutdown(browser, handle).await;
        Ok(())
    }
}

/// Closes `browser` and waits for its event handler to drain.
async fn shutdown(browser: Option<Browser>, handler_task: Option<JoinHandle<()>>) {
    if let Some(mut browser) = browser {
        info!("shutting down Chromium instance");
        if let Err(err) = browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
    }
    if let Some(handle) = handler_task {
        if let Err(err) = handle.await {
            warn!(error = %err, "browser handler join error");
        }
    }
}

impl Drop for ChromiumSubtitlePage {
    fn drop(&mut self) {
        let running = self
            .handler_task
            .get_mut()
            .ok()
            .and_then(|task| task.as_ref())
            .map(|task| !task.is_finished())
            .unwrap_or(false);
        if running {
            warn!("Chromium page dropped without explicit close");
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn launch_args_follow_config() {
        let factory = ChromiumPageFactory::new(
            BrowserSection {
                window_width: 1280,
                window_height: 720,
                disable_images: true,
                ..Default::default()
            },
            SubtitleSection::default(),
        );
        let args = factory.launch_args();
        assert_eq!(args[0], "--window-size=1280,720");
        assert!(args.contains(&"--blink-settings=imagesEnabled=false".to_string()));

        let factory = ChromiumPageFactory::new(
            BrowserSection {
                disable_images: false,
                ..Default::default()
            },
            SubtitleSection::default(),
        );
        assert!(!factory
            .launch_args()
            .iter()
            .any(|arg| arg.starts_with("--blink-settings")));
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_handler() {
        let drained = Arc::new(AtomicBool::new(false));
        let flag = drained.clone();
        let handler = tokio::spawn(async move {
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        });
        shutdown(None, Some(handler)).await;
        assert!(drained.load(Ordering::SeqCst));

        shutdown(None, None).await;
    }

    #[test]
    fn selectors_are_embedded_as_js_literals() {
        assert_eq!(js_string("a"), "\"a\"");
        assert_eq!(js_string("input[name=\"q\"]"), r#""input[name=\"q\"]""#);
        assert_eq!(js_string("下载"), "\"下载\"");
    }
}
