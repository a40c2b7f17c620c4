//! Attach terminal drivers to the active shell session

use super::renderer::TerminalRenderer;
use super::{AttachOptions, ShellDriver};
use crate::error::AppResult;
use crate::runner::GitAction;
use crate::state::{blocking, AppState};

/// Open (or reuse) the shell on the shell session and attach a driver to it
pub async fn open_terminal<R>(state: &AppState, renderer: R, options: AttachOptions) -> AppResult<ShellDriver<R>>
where
    R: TerminalRenderer + Send + 'static,
{
    let session = state.shell_session()?;
    let scrollback = state.settings.read().terminal.scrollback_bytes;

    blocking(move || {
        let mut driver = ShellDriver::new(renderer, scrollback);
        driver.attach_session(&session, options)?;
        Ok(driver)
    })
    .await
}

/// Run a Git action in the shell; the driver closes when the action finishes
pub async fn run_git_action<R>(
    state: &AppState,
    renderer: R,
    repo: String,
    action: GitAction,
) -> AppResult<ShellDriver<R>>
where
    R: TerminalRenderer + Send + 'static,
{
    tracing::info!("Git action {:?} in {}", action, repo);
    let options = AttachOptions {
        working_dir: None,
        deferred_command: Some(action.one_shot(&repo)),
    };
    open_terminal(state, renderer, options).await
}
