//! Browser control over the Chrome `DevTools` Protocol.
//!
//! With the `browser` feature, [`CdpDriver`] implements [`BrowserDriver`]
//! on top of chromiumoxide. Element handles are `data-ensayo-handle`
//! attributes placed by the probe script, so a handle stays bound to the
//! element it was resolved to until that element leaves the document.
//! Without the feature, [`launch`] reports [`EnsayoError::BrowserUnavailable`].

use crate::driver::BrowserDriver;
use crate::result::{EnsayoError, EnsayoResult};
use serde::{Deserialize, Serialize};

/// Browser configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    /// Run in headless mode
    pub headless: bool,
    /// Viewport width
    pub width: u32,
    /// Viewport height
    pub height: u32,
    /// Extra command-line arguments
    pub args: Vec<String>,
    /// Path to chromium binary (None = auto-detect)
    pub chromium_path: Option<String>,
    /// Sandbox mode (disable for containers)
    pub sandbox: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1280,
            height: 720,
            args: Vec::new(),
            chromium_path: None,
            sandbox: true,
        }
    }
}

impl BrowserConfig {
    /// Set viewport dimensions
    #[must_use]
    pub const fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set chromium path
    #[must_use]
    pub fn with_chromium_path(mut self, path: impl Into<String>) -> Self {
        self.chromium_path = Some(path.into());
        self
    }

    /// Add a command-line argument
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Disable sandbox (for containers/CI)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }
}

/// Launch a browser and return it as a driver
pub async fn launch(config: &BrowserConfig) -> EnsayoResult<Box<dyn BrowserDriver>> {
    #[cfg(feature = "browser")]
    {
        Ok(Box::new(cdp::CdpDriver::launch(config).await?))
    }
    #[cfg(not(feature = "browser"))]
    {
        let _ = config;
        Err(EnsayoError::BrowserUnavailable)
    }
}

// ============================================================================
// Real CDP Implementation (when `browser` feature is enabled)
// ============================================================================

#[cfg(feature = "browser")]
mod cdp {
    use super::*;
    use crate::driver::{ElementHandle, ElementState, FrameId, Probe};
    use crate::locator::{BoundingBox, Point, Strategy, HANDLE_ATTRIBUTE};
    use crate::result::ResolutionError;
    use async_trait::async_trait;
    use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
    use chromiumoxide::cdp::browser_protocol::input::{
        DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
    };
    use chromiumoxide::cdp::browser_protocol::page::{
        CaptureScreenshotFormat, CaptureScreenshotParams,
    };
    use chromiumoxide::page::Page;
    use futures::StreamExt;
    use serde::de::DeserializeOwned;
    use tracing::{debug, warn};

    fn cdp_err(e: impl std::fmt::Display) -> EnsayoError {
        EnsayoError::driver(e.to_string())
    }

    fn js_str(s: &str) -> String {
        serde_json::Value::String(s.to_string()).to_string()
    }

    /// Wrap `body` so it runs with `doc` bound to the frame's document
    fn in_frame(frame: &FrameId, body: &str) -> String {
        let path = serde_json::to_string(&frame.0).unwrap_or_else(|_| "[]".to_string());
        format!(
            "(() => {{ let w = window; for (const i of {path}) {{ \
             try {{ w = w.frames[i]; void w.document; }} catch (e) {{ w = null; }} if (!w) break; }} \
             if (!w) return {{ detached: true }}; const doc = w.document; {body} }})()"
        )
    }

    /// Wrap `body` so it runs with `el` bound to the handle's element
    fn on_element(handle: &ElementHandle, body: &str) -> String {
        in_frame(
            &handle.frame,
            &format!(
                "const el = doc.querySelector('[{HANDLE_ATTRIBUTE}=' + JSON.stringify({id}) + ']'); \
                 if (!el || !el.isConnected) return {{ attached: false }}; {body}",
                id = js_str(&handle.id)
            ),
        )
    }

    const STATE_JS: &str = "const r = el.getBoundingClientRect(); \
        let ox = 0, oy = 0, v = el.ownerDocument.defaultView; \
        while (v && v.frameElement) { const f = v.frameElement.getBoundingClientRect(); ox += f.left; oy += f.top; v = v.parent; } \
        const s = el.ownerDocument.defaultView.getComputedStyle(el); \
        const visible = r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; \
        const hit = visible ? doc.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2) : null; \
        return { attached: true, visible, \
          enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true', \
          occluded: visible && !(hit && (hit === el || el.contains(hit))), \
          x: r.left + ox, y: r.top + oy, width: r.width, height: r.height };";

    const FRAMES_JS: &str = "(() => { const out = [[]]; \
        const walk = (w, path) => { for (let i = 0; i < w.frames.length; i++) { const p = path.concat([i]); \
          try { void w.frames[i].document; out.push(p); walk(w.frames[i], p); } catch (e) {} } }; \
        walk(window, []); return out; })()";

    const MUTATIONS_JS: &str = "(() => { if (!window.__ensayoMutations) { \
        window.__ensayoMutations = { n: 0 }; \
        new MutationObserver(ms => { window.__ensayoMutations.n += ms.length; }) \
          .observe(document, { subtree: true, childList: true, attributes: true, characterData: true }); } \
        return window.__ensayoMutations.n; })()";

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct ProbeReply {
        detached: bool,
        visible: usize,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct StateReply {
        detached: bool,
        attached: bool,
        visible: bool,
        enabled: bool,
        occluded: bool,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct ValueReply {
        detached: bool,
        attached: bool,
        ok: bool,
        value: Option<String>,
    }

    /// Chromium driven over CDP
    #[derive(Debug)]
    pub struct CdpDriver {
        browser: CdpBrowser,
        page: Page,
        handler: tokio::task::JoinHandle<()>,
        pointer_pressed: bool,
        mutation_base: u64,
        last_mutations: u64,
        closed: bool,
    }

    impl CdpDriver {
        /// Launch chromium and open a blank page
        pub async fn launch(config: &BrowserConfig) -> EnsayoResult<Self> {
            let mut builder = CdpConfig::builder().window_size(config.width, config.height);
            if !config.headless {
                builder = builder.with_head();
            }
            if !config.sandbox {
                builder = builder.no_sandbox();
            }
            if let Some(ref path) = config.chromium_path {
                builder = builder.chrome_executable(path);
            }
            if !config.args.is_empty() {
                builder = builder.args(config.args.iter());
            }
            let cdp_config = builder.build().map_err(cdp_err)?;

            let (browser, mut handler) = CdpBrowser::launch(cdp_config).await.map_err(cdp_err)?;
            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        break;
                    }
                }
            });
            let page = browser.new_page("about:blank").await.map_err(cdp_err)?;
            debug!(headless = config.headless, width = config.width, height = config.height, "browser launched");

            Ok(Self {
                browser,
                page,
                handler,
                pointer_pressed: false,
                mutation_base: 0,
                last_mutations: 0,
                closed: false,
            })
        }

        async fn eval<T: DeserializeOwned>(&self, script: String) -> EnsayoResult<T> {
            self.page
                .evaluate_expression(script)
                .await
                .map_err(cdp_err)?
                .into_value()
                .map_err(cdp_err)
        }

        async fn state(&self, handle: &ElementHandle) -> EnsayoResult<StateReply> {
            let reply: StateReply = self.eval(on_element(handle, STATE_JS)).await?;
            if reply.detached {
                return Err(ResolutionError::FrameDetached {
                    frame: handle.frame.to_string(),
                }
                .into());
            }
            Ok(reply)
        }

        async fn center(&self, handle: &ElementHandle) -> EnsayoResult<Point> {
            let s = self.state(handle).await?;
            if !s.attached {
                return Err(EnsayoError::driver(format!("handle {} is stale", handle.id)));
            }
            Ok(BoundingBox::new(s.x, s.y, s.width, s.height).center())
        }

        async fn mouse(&mut self, kind: DispatchMouseEventType, at: Point) -> EnsayoResult<()> {
            let mut builder = DispatchMouseEventParams::builder()
                .r#type(kind.clone())
                .x(at.x)
                .y(at.y);
            builder = match kind {
                DispatchMouseEventType::MousePressed | DispatchMouseEventType::MouseReleased => {
                    builder.button(MouseButton::Left).click_count(1)
                }
                _ if self.pointer_pressed => builder.button(MouseButton::Left).buttons(1),
                _ => builder,
            };
            let params = builder.build().map_err(cdp_err)?;
            self.page.execute(params).await.map_err(cdp_err)?;
            Ok(())
        }

        async fn element_value(&self, handle: &ElementHandle, body: &str) -> EnsayoResult<ValueReply> {
            let reply: ValueReply = self.eval(on_element(handle, body)).await?;
            if reply.detached {
                return Err(ResolutionError::FrameDetached {
                    frame: handle.frame.to_string(),
                }
                .into());
            }
            if !reply.attached {
                return Err(EnsayoError::driver(format!("handle {} is stale", handle.id)));
            }
            Ok(reply)
        }
    }

    #[async_trait]
    impl BrowserDriver for CdpDriver {
        async fn navigate(&mut self, url: &str) -> EnsayoResult<()> {
            self.page.goto(url).await.map_err(|e| {
                EnsayoError::driver(format!("navigation to {url} failed: {e}"))
            })?;
            Ok(())
        }

        async fn current_url(&mut self) -> EnsayoResult<String> {
            Ok(self.page.url().await.map_err(cdp_err)?.unwrap_or_default())
        }

        async fn frames(&mut self) -> EnsayoResult<Vec<FrameId>> {
            let paths: Vec<Vec<usize>> = self.eval(FRAMES_JS.to_string()).await?;
            Ok(paths.into_iter().map(FrameId).collect())
        }

        async fn probe(&mut self, frame: &FrameId, strategy: &Strategy) -> EnsayoResult<Probe> {
            let handle_id = uuid::Uuid::new_v4().to_string();
            let body = format!(
                "const all = {query}; \
                 const visible = all.filter(el => {{ const r = el.getBoundingClientRect(); \
                   const s = el.ownerDocument.defaultView.getComputedStyle(el); \
                   return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }}); \
                 if (visible.length === 1) visible[0].setAttribute('{HANDLE_ATTRIBUTE}', {id}); \
                 return {{ detached: false, visible: visible.length }};",
                query = strategy.to_query_all(),
                id = js_str(&handle_id)
            );
            let reply: ProbeReply = self.eval(in_frame(frame, &body)).await?;
            if reply.detached {
                return Err(ResolutionError::FrameDetached {
                    frame: frame.to_string(),
                }
                .into());
            }
            let handle = (reply.visible == 1)
                .then(|| ElementHandle::new(handle_id, frame.clone(), strategy.to_string()));
            Ok(Probe {
                visible: reply.visible,
                handle,
            })
        }

        async fn element_state(&mut self, handle: &ElementHandle) -> EnsayoResult<ElementState> {
            let s = self.state(handle).await?;
            if !s.attached {
                return Ok(ElementState::detached());
            }
            Ok(ElementState {
                attached: true,
                visible: s.visible,
                enabled: s.enabled,
                occluded: s.occluded,
                bounds: Some(BoundingBox::new(s.x, s.y, s.width, s.height)),
            })
        }

        async fn click(&mut self, handle: &ElementHandle) -> EnsayoResult<()> {
            let at = self.center(handle).await?;
            self.mouse(DispatchMouseEventType::MouseMoved, at).await?;
            self.mouse(DispatchMouseEventType::MousePressed, at).await?;
            self.mouse(DispatchMouseEventType::MouseReleased, at).await
        }

        async fn fill(&mut self, handle: &ElementHandle, value: &str) -> EnsayoResult<()> {
            let body = format!(
                "el.focus(); const v = {value}; \
                 if (el.isContentEditable) {{ el.textContent = v; }} else {{ \
                   const d = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value'); \
                   if (d && d.set) d.set.call(el, v); else el.value = v; }} \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return {{ attached: true, ok: true }};",
                value = js_str(value)
            );
            self.element_value(handle, &body).await.map(|_| ())
        }

        async fn hover(&mut self, handle: &ElementHandle) -> EnsayoResult<()> {
            let at = self.center(handle).await?;
            self.mouse(DispatchMouseEventType::MouseMoved, at).await
        }

        async fn select_option(&mut self, handle: &ElementHandle, value: &str) -> EnsayoResult<()> {
            let body = format!(
                "const v = {value}; \
                 const opt = Array.from(el.options || []).find(o => o.value === v || o.label.trim() === v); \
                 if (!opt) return {{ attached: true, ok: false }}; \
                 el.value = opt.value; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return {{ attached: true, ok: true }};",
                value = js_str(value)
            );
            let reply = self.element_value(handle, &body).await?;
            if reply.ok {
                Ok(())
            } else {
                Err(EnsayoError::driver(format!("no option {value:?} in select")))
            }
        }

        async fn pointer_down(&mut self, at: Point) -> EnsayoResult<()> {
            self.mouse(DispatchMouseEventType::MouseMoved, at).await?;
            self.mouse(DispatchMouseEventType::MousePressed, at).await?;
            self.pointer_pressed = true;
            Ok(())
        }

        async fn pointer_move(&mut self, to: Point) -> EnsayoResult<()> {
            self.mouse(DispatchMouseEventType::MouseMoved, to).await
        }

        async fn pointer_up(&mut self, at: Point) -> EnsayoResult<()> {
            let result = self.mouse(DispatchMouseEventType::MouseReleased, at).await;
            self.pointer_pressed = false;
            result
        }

        async fn text(&mut self, handle: &ElementHandle) -> EnsayoResult<String> {
            let reply = self
                .element_value(
                    handle,
                    "return { attached: true, ok: true, value: el.innerText ?? el.textContent ?? '' };",
                )
                .await?;
            Ok(reply.value.unwrap_or_default())
        }

        async fn attribute(
            &mut self,
            handle: &ElementHandle,
            name: &str,
        ) -> EnsayoResult<Option<String>> {
            let body = format!(
                "return {{ attached: true, ok: true, value: el.getAttribute({}) }};",
                js_str(name)
            );
            Ok(self.element_value(handle, &body).await?.value)
        }

        async fn ready_state(&mut self) -> EnsayoResult<String> {
            self.eval("document.readyState".to_string()).await
        }

        async fn resource_count(&mut self) -> EnsayoResult<u64> {
            self.eval("performance.getEntriesByType('resource').length".to_string())
                .await
        }

        async fn mutation_count(&mut self) -> EnsayoResult<u64> {
            let raw: u64 = self.eval(MUTATIONS_JS.to_string()).await?;
            if raw < self.last_mutations {
                // New document: keep the counter monotonic and count the swap
                self.mutation_base += self.last_mutations + 1;
            }
            self.last_mutations = raw;
            Ok(self.mutation_base + raw)
        }

        async fn snapshot(&mut self) -> EnsayoResult<String> {
            self.page.content().await.map_err(cdp_err)
        }

        async fn screenshot(&mut self) -> EnsayoResult<Vec<u8>> {
            let params = CaptureScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build();
            let screenshot = self.page.execute(params).await.map_err(cdp_err)?;

            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(&screenshot.data)
                .map_err(cdp_err)
        }

        async fn close(&mut self) -> EnsayoResult<()> {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            let result = self.browser.close().await.map(|_| ()).map_err(cdp_err);
            if let Err(e) = self.browser.wait().await {
                warn!(error = %e, "browser process did not exit cleanly");
            }
            self.handler.abort();
            result
        }
    }

}

#[cfg(feature = "browser")]
pub use cdp::CdpDriver;
