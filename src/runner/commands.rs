//! Async one-shot commands on the active files session

use super::{Branches, CommandRunner, GitRepo};
use crate::error::AppResult;
use crate::history::HistoryRecord;
use crate::ssh::CapturedOutput;
use crate::state::{blocking, AppState};

fn runner(state: &AppState) -> AppResult<CommandRunner> {
    Ok(CommandRunner::new(state.files_session()?))
}

pub async fn execute(state: &AppState, command: String) -> AppResult<CapturedOutput> {
    let runner = runner(state)?;
    blocking(move || runner.run_captured(&command)).await
}

pub async fn git_branches(state: &AppState, repo: String) -> AppResult<Branches> {
    let repo = GitRepo::new(runner(state)?, repo);
    blocking(move || repo.branches()).await
}

pub async fn git_remote_branches(state: &AppState, repo: String) -> AppResult<Vec<String>> {
    let repo = GitRepo::new(runner(state)?, repo);
    blocking(move || repo.remote_branches()).await
}

pub async fn git_log(state: &AppState, repo: String, branch: String) -> AppResult<String> {
    let repo = GitRepo::new(runner(state)?, repo);
    blocking(move || repo.log(&branch)).await
}

pub async fn git_diff(state: &AppState, repo: String) -> AppResult<String> {
    let repo = GitRepo::new(runner(state)?, repo);
    blocking(move || repo.diff()).await
}

pub async fn fetch_history(state: &AppState) -> AppResult<HistoryRecord> {
    let runner = runner(state)?;
    blocking(move || HistoryRecord::fetch(&runner)).await
}
