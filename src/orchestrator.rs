use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::{GitCli, RootAnchor};
use crate::host::{Host, require_cursor};
use crate::inject::{DeliveryMode, ExternalDeliveryChannel, insert_into_buffer};
use crate::llm::ChatClient;
use crate::prompts::{FileKind, PromptEngine, extension_of};

/// Where a review invocation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Idle,
    DiffDiscovery,
    NoChanges,
    PromptReady,
    AwaitingService,
    ReviewReady,
    Failed,
    Injected,
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReviewState::Idle => "idle",
            ReviewState::DiffDiscovery => "diff-discovery",
            ReviewState::NoChanges => "no-changes",
            ReviewState::PromptReady => "prompt-ready",
            ReviewState::AwaitingService => "awaiting-service",
            ReviewState::ReviewReady => "review-ready",
            ReviewState::Failed => "failed",
            ReviewState::Injected => "injected",
        };
        f.write_str(name)
    }
}

/// How an invocation that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The file has no changes in any comparison; the service was not called.
    NoChanges,
    /// The review was delivered. `text` is exactly what was delivered.
    Injected { text: String },
    /// The user previewed the review and chose not to insert it.
    Declined { response: String },
}

/// The file under review and the project it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub file_path: PathBuf,
    pub workspace_root: PathBuf,
}

impl InvocationContext {
    /// Repository search anchors: the file's own ancestry first, then the workspace.
    pub fn root_anchors(&self) -> Vec<RootAnchor> {
        let mut anchors = Vec::new();
        if let Some(dir) = self.file_path.parent() {
            anchors.push(RootAnchor::FileDirectory(dir.to_path_buf()));
        }
        if self.file_path.parent() != Some(self.workspace_root.as_path()) {
            anchors.push(RootAnchor::Workspace(self.workspace_root.clone()));
        }
        anchors
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Runs one review command: diff, prompt, service call, delivery.
pub struct Orchestrator<H, C, D> {
    host: H,
    client: C,
    channel: D,
    git: GitCli,
    prompt_engine: PromptEngine,
    config: Config,
    // States visited by the most recent run, starting at `Idle`.
    trail: RefCell<Vec<ReviewState>>,
}

impl<H: Host, C: ChatClient, D: ExternalDeliveryChannel> Orchestrator<H, C, D> {
    pub fn new(host: H, client: C, channel: D, prompt_engine: PromptEngine, config: Config) -> Self {
        let git = GitCli::new("git", config.git_timeout);
        Self {
            host,
            client,
            channel,
            git,
            prompt_engine,
            config,
            trail: RefCell::new(vec![ReviewState::Idle]),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn channel(&self) -> &D {
        &self.channel
    }

    pub fn state(&self) -> ReviewState {
        self.trail
            .borrow()
            .last()
            .copied()
            .unwrap_or(ReviewState::Idle)
    }

    /// Every state the last run passed through, in order.
    pub fn trail(&self) -> Vec<ReviewState> {
        self.trail.borrow().clone()
    }

    fn advance(&self, to: ReviewState) {
        let from = self.state();
        self.trail.borrow_mut().push(to);
        debug!(%from, %to, "review state transition");
    }

    /// Resolve the active file and its workspace from the host.
    pub fn context(&self) -> Result<InvocationContext> {
        let doc = self.host.active_document().ok_or(Error::NoActiveDocument)?;
        let workspace_root = doc
            .workspace_root
            .or_else(|| doc.file_path.parent().map(Path::to_path_buf))
            .filter(|p| p.is_dir())
            .ok_or(Error::NoWorkspace)?;
        Ok(InvocationContext {
            file_path: doc.file_path,
            workspace_root,
        })
    }

    /// Run the review and return how it ended. Errors are returned unchanged.
    pub async fn run(&self) -> Result<ReviewOutcome> {
        self.trail.replace(vec![ReviewState::Idle]);
        let result = self.run_inner().await;
        if result.is_err() {
            self.advance(ReviewState::Failed);
        }
        self.advance(ReviewState::Idle);
        result
    }

    async fn run_inner(&self) -> Result<ReviewOutcome> {
        let ctx = self.context()?;
        self.advance(ReviewState::DiffDiscovery);
        info!(file = %ctx.file_path.display(), "starting review");

        let repo_root = self.git.resolve_repository_root(&ctx.root_anchors()).await?;
        let diff = self.git.collect_diff(&repo_root, &ctx.file_path).await?;

        if diff.is_empty() {
            self.advance(ReviewState::NoChanges);
            return Ok(ReviewOutcome::NoChanges);
        }

        let extension = extension_of(&ctx.file_path);
        let prompt = self
            .prompt_engine
            .build_prompt(&ctx.file_name(), &extension, &diff)?;
        let system = self.prompt_engine.system_prompt()?;
        self.advance(ReviewState::PromptReady);

        // Buffer delivery needs a cursor; check it before the service call.
        if self.config.delivery == DeliveryMode::Buffer {
            require_cursor(&self.host)?;
        }

        let wants_preview =
            self.config.preview && self.host.confirm("Preview the review before inserting it?");

        self.advance(ReviewState::AwaitingService);
        let response = self.client.complete(&system, &prompt)?;
        self.advance(ReviewState::ReviewReady);

        if wants_preview {
            self.host.show_preview(&response);
            if !self.host.confirm("Insert this review?") {
                return Ok(ReviewOutcome::Declined { response });
            }
        }

        let text = match self.config.delivery {
            DeliveryMode::Buffer => {
                let style = FileKind::from_extension(&extension).comment_style();
                insert_into_buffer(&self.host, &response, style)?
            }
            DeliveryMode::Automation => {
                self.channel.deliver(&response).await?;
                response
            }
        };

        self.advance(ReviewState::Injected);
        Ok(ReviewOutcome::Injected { text })
    }

    /// Run the review and report the result to the user through the host.
    pub async fn execute(&self) -> Result<ReviewOutcome> {
        let result = self.run().await;
        match &result {
            Ok(ReviewOutcome::NoChanges) => {
                self.host.info("No changes found in this file; nothing to review.");
            }
            Ok(ReviewOutcome::Injected { .. }) => match self.config.delivery {
                DeliveryMode::Buffer => self.host.info("AI review inserted."),
                DeliveryMode::Automation => self.host.info(&format!(
                    "AI review sent to {}.",
                    self.config.target_app.as_deref().unwrap_or("the target application")
                )),
            },
            Ok(ReviewOutcome::Declined { .. }) => {
                self.host.info("Review not inserted.");
            }
            Err(e) => {
                warn!(error = %e, "review failed");
                self.host.error(&e.to_string());
            }
        }
        result
    }
}
