//! `ci`: install and lint the frontend.

use anyhow::Result;
use mocbot_ci_core::RunContext;
use tracing::info;

use super::{Outcome, pipeline, print};
use crate::settings::Settings;

pub async fn run(settings: &Settings, ctx: &RunContext, json: bool) -> Result<()> {
    let pipeline = pipeline(settings).await?;
    info!(run_id = %ctx.run_id(), source = %pipeline.source().path().display(), "Starting CI");

    let stdout = pipeline.ci(ctx).await?;
    print(
        &Outcome {
            operation: "ci",
            output: &stdout,
        },
        json,
    )
}
