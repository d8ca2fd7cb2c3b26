//! `build-and-push`: build the image and publish it.

use anyhow::Result;
use mocbot_ci_core::{BuildAndPushOpts, RunContext};
use tracing::info;

use super::{Outcome, pipeline, print};
use crate::settings::Settings;

pub async fn run(
    settings: &Settings,
    ctx: &RunContext,
    environment: Option<String>,
    repository_name: Option<String>,
    json: bool,
) -> Result<()> {
    let pipeline = pipeline(settings).await?;
    let opts = BuildAndPushOpts {
        environment: environment.unwrap_or_else(|| settings.environment.clone()),
        repository_name,
    };
    info!(
        run_id = %ctx.run_id(),
        repository = %opts.repository_name.as_deref().unwrap_or(pipeline.repository_name()),
        environment = %opts.environment,
        "Starting build and push"
    );

    let published = pipeline.build_and_push(ctx, opts).await?;
    print(
        &Outcome {
            operation: "build-and-push",
            output: &published,
        },
        json,
    )
}
