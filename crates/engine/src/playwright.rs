//! Playwright capture driver
//!
//! Each browsing context is a `node` process running a small bridge script
//! that owns one Playwright browser, context and page. The bridge speaks
//! newline-delimited JSON: one command per line on stdin, one response per
//! line on stdout. Screenshots come back base64-encoded.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::debug;

use crate::driver::{CaptureDriver, NavigateOptions, NavigationOutcome};
use crate::error::{RegressionError, RegressionResult};
use crate::profile::ViewportProfile;
use crate::record::RawImage;

/// Full-page PNGs of long pages are large; base64 adds a third on top.
const MAX_RESPONSE_BYTES: usize = 512 * 1024 * 1024;

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
// `node -e` leaves no script path in argv
const [, browserName, headlessFlag, profileJson] = process.argv;

function reply(msg) {
  process.stdout.write(JSON.stringify(msg) + '\n');
}

function describe(err) {
  return err && err.message ? err.message : String(err);
}

(async () => {
  let browser;
  try {
    const pw = require('playwright');
    const profile = JSON.parse(profileJson);
    browser = await pw[browserName].launch({ headless: headlessFlag !== '0' });

    const options = {
      viewport: { width: profile.width, height: profile.height },
      deviceScaleFactor: profile.device_scale_factor,
      hasTouch: profile.has_touch,
    };
    if (browserName !== 'firefox') options.isMobile = profile.is_mobile;
    if (profile.user_agent) options.userAgent = profile.user_agent;

    const context = await browser.newContext(options);
    const page = await context.newPage();
    reply({ ok: true, event: 'ready' });

    const rl = readline.createInterface({ input: process.stdin });
    for await (const line of rl) {
      if (!line.trim()) continue;
      const cmd = JSON.parse(line);
      try {
        if (cmd.op === 'navigate') {
          const response = await page.goto(cmd.url, { waitUntil: cmd.wait_until, timeout: cmd.timeout_ms });
          reply({ ok: true, status: response ? response.status() : null });
        } else if (cmd.op === 'screenshot') {
          const png = await page.screenshot({ fullPage: true, type: 'png' });
          reply({ ok: true, png: png.toString('base64') });
        } else if (cmd.op === 'close') {
          reply({ ok: true });
          break;
        } else {
          reply({ ok: false, kind: 'protocol', message: 'unknown op ' + cmd.op });
        }
      } catch (err) {
        const kind = err && err.name === 'TimeoutError' ? 'timeout' : cmd.op;
        reply({ ok: false, kind, message: describe(err) });
      }
    }
  } catch (err) {
    reply({ ok: false, kind: 'startup', message: describe(err) });
    process.exitCode = 1;
  } finally {
    if (browser) {
      await browser.close();
    }
  }
})();
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = RegressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(RegressionError::Config(format!("Unknown browser '{}'", other))),
        }
    }
}

/// Configuration for the Playwright driver
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub node_command: String,
    pub browser: Browser,
    pub headless: bool,
    /// Time allowed for node to launch the browser and open the page
    pub startup_timeout: Duration,
    /// Time allowed for the full-page screenshot
    pub screenshot_timeout: Duration,
    /// Extra time granted past the browser's own deadline before the context is killed
    pub grace_period: Duration,
    /// Directory handed to node as `NODE_PATH`, for a Playwright install outside the working tree
    pub node_path: Option<PathBuf>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_command: "node".to_string(),
            browser: Browser::Chromium,
            headless: true,
            startup_timeout: Duration::from_secs(30),
            screenshot_timeout: Duration::from_secs(60),
            grace_period: Duration::from_secs(5),
            node_path: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Navigate {
        url: &'a str,
        wait_until: &'static str,
        timeout_ms: u64,
    },
    Screenshot,
    Close,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    ok: bool,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    png: Option<String>,
}

impl BridgeResponse {
    fn failure(&self) -> String {
        self.message.clone().unwrap_or_else(|| "unknown bridge failure".to_string())
    }
}

/// One running bridge process
pub struct PlaywrightContext {
    child: Child,
    stdin: FramedWrite<ChildStdin, LinesCodec>,
    stdout: FramedRead<ChildStdout, LinesCodec>,
    profile: String,
}

impl PlaywrightContext {
    async fn send(&mut self, command: &BridgeCommand<'_>) -> RegressionResult<()> {
        let line = serde_json::to_string(command)?;
        self.stdin
            .send(line)
            .await
            .map_err(|e| RegressionError::Driver(format!("bridge write failed: {}", e)))
    }

    async fn receive(&mut self) -> RegressionResult<BridgeResponse> {
        match self.stdout.next().await {
            Some(Ok(line)) => Ok(serde_json::from_str(&line)?),
            Some(Err(e)) => Err(RegressionError::Driver(format!("bridge read failed: {}", e))),
            None => Err(RegressionError::Driver(format!(
                "bridge for profile '{}' exited unexpectedly",
                self.profile
            ))),
        }
    }

    async fn request(
        &mut self,
        command: &BridgeCommand<'_>,
        limit: Duration,
    ) -> Option<RegressionResult<BridgeResponse>> {
        if let Err(e) = self.send(command).await {
            return Some(Err(e));
        }
        timeout(limit, self.receive()).await.ok()
    }
}

/// Capture driver backed by Playwright running under node
#[derive(Debug, Clone, Default)]
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
}

impl PlaywrightDriver {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    fn node(&self) -> Command {
        let mut command = Command::new(&self.config.node_command);
        if let Some(dir) = &self.config.node_path {
            command.env("NODE_PATH", dir);
        }
        command
    }

    /// Verify node can load Playwright
    pub async fn check_available(&self) -> RegressionResult<()> {
        let status = self
            .node()
            .args(["-e", "require.resolve('playwright')"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(RegressionError::Driver(
                "Playwright not found. Install with: npm install playwright && npx playwright install"
                    .to_string(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl CaptureDriver for PlaywrightDriver {
    type Context = PlaywrightContext;

    async fn open(&self, profile: &ViewportProfile) -> RegressionResult<PlaywrightContext> {
        let profile_json = serde_json::to_string(profile)?;

        let mut child = self
            .node()
            .arg("-e")
            .arg(BRIDGE_SCRIPT)
            .arg(self.config.browser.as_str())
            .arg(if self.config.headless { "1" } else { "0" })
            .arg(profile_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RegressionError::Driver(format!(
                    "failed to spawn {}: {}",
                    self.config.node_command, e
                ))
            })?;

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => return Err(RegressionError::Driver("bridge pipes unavailable".to_string())),
        };

        let profile_name = profile.name.clone();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new());
            while let Some(Ok(line)) = lines.next().await {
                debug!(profile = %profile_name, "bridge: {}", line);
            }
        });

        let mut context = PlaywrightContext {
            child,
            stdin: FramedWrite::new(stdin, LinesCodec::new()),
            stdout: FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_RESPONSE_BYTES)),
            profile: profile.name.clone(),
        };

        let ready = match timeout(self.config.startup_timeout, context.receive()).await {
            Ok(response) => response?,
            Err(_) => {
                return Err(RegressionError::Driver(format!(
                    "browser did not start within {:?}",
                    self.config.startup_timeout
                )))
            }
        };
        if !ready.ok {
            return Err(RegressionError::Driver(format!(
                "browser startup failed: {}",
                ready.failure()
            )));
        }

        debug!(profile = %profile.name, "Opened {} context", self.config.browser.as_str());
        Ok(context)
    }

    async fn navigate(
        &self,
        context: &mut PlaywrightContext,
        url: &str,
        options: &NavigateOptions,
    ) -> RegressionResult<NavigationOutcome> {
        let timeout_ms = options.timeout.as_millis() as u64;
        let command = BridgeCommand::Navigate {
            url,
            wait_until: options.ready_signal.as_wait_until(),
            timeout_ms,
        };

        let response = match context
            .request(&command, options.timeout + self.config.grace_period)
            .await
        {
            Some(response) => response?,
            None => {
                return Err(RegressionError::CaptureTimeout {
                    url: url.to_string(),
                    timeout_ms,
                })
            }
        };

        if response.ok {
            return Ok(NavigationOutcome {
                status: response.status,
            });
        }

        match response.kind.as_deref() {
            Some("timeout") => Err(RegressionError::CaptureTimeout {
                url: url.to_string(),
                timeout_ms,
            }),
            _ => Err(RegressionError::Navigation {
                url: url.to_string(),
                reason: response.failure(),
            }),
        }
    }

    async fn capture_full_page(&self, context: &mut PlaywrightContext) -> RegressionResult<RawImage> {
        let limit = self.config.screenshot_timeout + self.config.grace_period;
        let response = match context.request(&BridgeCommand::Screenshot, limit).await {
            Some(response) => response?,
            None => {
                return Err(RegressionError::CaptureTimeout {
                    url: format!("<{} screenshot>", context.profile),
                    timeout_ms: limit.as_millis() as u64,
                })
            }
        };

        if !response.ok {
            return Err(RegressionError::Driver(format!(
                "screenshot failed: {}",
                response.failure()
            )));
        }

        let encoded = response
            .png
            .ok_or_else(|| RegressionError::Driver("screenshot response without image".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RegressionError::Driver(format!("screenshot is not valid base64: {}", e)))?;

        Ok(RawImage::new(bytes))
    }

    async fn close(&self, mut context: PlaywrightContext) -> RegressionResult<()> {
        let graceful = context
            .request(&BridgeCommand::Close, self.config.grace_period)
            .await;
        if !matches!(graceful, Some(Ok(_))) {
            debug!(profile = %context.profile, "Bridge did not acknowledge close, killing");
            let _ = context.child.kill().await;
            return Ok(());
        }

        match timeout(self.config.grace_period, context.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(RegressionError::Driver(format!("bridge wait failed: {}", e))),
            Err(_) => {
                let _ = context.child.kill().await;
                Ok(())
            }
        }
    }
}
