//
// Copyright (c) 2020-2021 science+computing ag and other contributors
//
// This program and the accompanying materials are made
// available under the terms of the Eclipse Public License 2.0
// which is available at https://www.eclipse.org/legal/epl-2.0/
//
// SPDX-License-Identifier: EPL-2.0
//

//! Resource allocation for cluster submissions.
//!
//! A job is classified into an allocation class, the matching template is
//! fetched from the allocation table (falling back to the class default),
//! user extras and analysis reservations are appended, and any `--time` /
//! `--mem` fragment carrying shape placeholders is evaluated and rendered
//! into scheduler syntax.

mod expr;

pub use expr::Expr;
pub use expr::Variable;

use parse_display::Display;
use uuid::Uuid;

use crate::context::Context;
use crate::db::models::JobRow;
use crate::error::Error;
use crate::error::Result;
use crate::job::Shape;
use crate::platform::AnalysisId;
use crate::platform::CommandSpec;
use crate::platform::CMD_COMPLETE_JOB;
use crate::platform::CMD_REGISTER;
use crate::platform::CMD_RELEASE_VALIDATORS;
use crate::platform::CMD_VALIDATE;

/// The allocation string recorded for a job whose template could not be
/// satisfied. The job is failed alongside; this marker is never submitted.
pub const NOT_VALID: &str = "Not valid";

const PLACEHOLDERS: [&str; 3] = ["{samples}", "{columns}", "{input_size}"];

/// Allocation classes of the resource table
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[display(style = "SNAKE_CASE")]
pub enum JobType {
    CompleteJobsResourceParam,
    ReleaseValidatorsResourceParam,
    Validator,
    Register,
    ResourceParamsCommand,
}

/// Outcome of resolving an allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Allocation(String),
    /// The template referenced shape data this job does not have, or the
    /// arithmetic came out non-positive. Carries the user-visible message
    /// the job is failed with.
    Invalid(String),
}

/// Select and materialize the resource-allocation string for a job.
pub fn resolve(ctx: &Context, job: &JobRow) -> Result<Resolved> {
    let cmd = ctx.catalog().command(job.command)?;
    let (job_type, name, analysis) = classify(ctx, job, &cmd)?;
    let job_type = job_type.to_string();

    let template = match ctx.store().allocation(&name, &job_type)? {
        Some(t) => t,
        None => ctx
            .store()
            .allocation("default", &job_type)?
            .ok_or_else(|| {
                Error::Resource(format!("Could not match '{name}' to a resource allocation!"))
            })?,
    };

    let user = ctx.users().user(&job.user)?;
    let mut allocation = format!("{} {}", template, user.scheduler_parameters())
        .trim()
        .to_string();

    if let Some(analysis) = analysis {
        let reservation = ctx
            .registry()
            .analysis(analysis)
            .ok()
            .and_then(|a| a.reservation().clone());
        if let Some(reservation) = reservation {
            allocation = format!("{allocation} --reservation {reservation}");
        }
    }

    if PLACEHOLDERS.iter().any(|p| allocation.contains(p)) {
        let shape = crate::job::shape_of(ctx, job, &cmd);
        match substitute(&allocation, &shape) {
            Ok(substituted) => allocation = substituted,
            Err(_) => {
                return Ok(Resolved::Invalid(format!(
                    "Obvious incorrect allocation. Please contact {}",
                    ctx.config().help_email()
                )))
            }
        }
    }

    Ok(Resolved::Allocation(allocation))
}

fn classify(
    ctx: &Context,
    job: &JobRow,
    cmd: &CommandSpec,
) -> Result<(JobType, String, Option<AnalysisId>)> {
    match cmd.name().as_str() {
        CMD_COMPLETE_JOB => {
            let payload: serde_json::Value =
                serde_json::from_str(job.parameters.scalar("payload").unwrap_or("{}"))?;
            // an empty string is preferable to a missing name here, it maps
            // to the class default allocation
            let name = payload
                .get("artifacts")
                .and_then(|a| a.as_object())
                .and_then(|o| o.values().next())
                .and_then(|v| v.get("artifact_type"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let mut analysis = None;
            let target = payload
                .get("job_id")
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok());
            if let Some(target) = target {
                if let Ok(target) = ctx.store().job(target) {
                    analysis = analysis_of(ctx, &target)?;
                }
            }
            Ok((JobType::CompleteJobsResourceParam, name, analysis))
        }

        CMD_RELEASE_VALIDATORS => {
            let target = job.parameters.require::<Uuid>("job")?;
            let target = ctx.store().job(target)?;
            let name = ctx.catalog().command(target.command)?.name().clone();
            let analysis = first_input_analysis(ctx, &target)?;
            Ok((JobType::ReleaseValidatorsResourceParam, name, analysis))
        }

        CMD_VALIDATE => {
            let name = job
                .parameters
                .scalar("artifact_type")
                .unwrap_or_default()
                .to_string();
            let analysis = job
                .parameters
                .scalar("analysis")
                .and_then(|s| s.parse().ok());
            Ok((JobType::Validator, name, analysis))
        }

        CMD_REGISTER => Ok((JobType::Register, CMD_REGISTER.to_string(), None)),

        _ => {
            let analysis = analysis_of(ctx, job)?;
            Ok((JobType::ResourceParamsCommand, cmd.name().clone(), analysis))
        }
    }
}

/// Analysis of a job: the `analysis` parameter wins, the first input
/// artifact's analysis is the fallback
fn analysis_of(ctx: &Context, job: &JobRow) -> Result<Option<AnalysisId>> {
    if let Some(analysis) = job
        .parameters
        .scalar("analysis")
        .and_then(|s| s.parse().ok())
    {
        return Ok(Some(analysis));
    }
    first_input_analysis(ctx, job)
}

fn first_input_analysis(ctx: &Context, job: &JobRow) -> Result<Option<AnalysisId>> {
    Ok(ctx
        .store()
        .input_artifacts(job.id)?
        .first()
        .and_then(|a| ctx.registry().artifact(*a).ok())
        .and_then(|info| *info.analysis()))
}

/// Validate a template's evaluatable fragments. Called when an allocation row
/// is loaded into the store, so broken arithmetic never reaches submission.
pub fn validate_template(template: &str) -> Result<()> {
    for_each_fragment(template, |flag, src| {
        if src.contains('{') {
            Expr::parse(src).map_err(|e| {
                Error::Resource(format!("Invalid --{flag} fragment in template: {e}"))
            })?;
        }
        Ok(None)
    })
    .map(|_| ())
}

/// Evaluate and render the `--time` / `--mem` fragments of an allocation.
fn substitute(allocation: &str, shape: &Shape) -> Result<String> {
    for_each_fragment(allocation, |flag, src| {
        if !src.contains('{') {
            return Ok(None);
        }
        let value = Expr::parse(src)?.eval(shape)?;
        if !value.is_finite() || value <= 0.0 {
            return Err(Error::Resource(format!(
                "--{flag} evaluated to a non-positive value"
            )));
        }
        Ok(Some(match flag {
            "time" => format_duration(value),
            _ => binary_size(value),
        }))
    })
}

/// Walk the `--`-separated fragments of a template. The callback sees every
/// `time` / `mem` fragment and may replace its expression part; all other
/// fragments pass through untouched.
fn for_each_fragment(
    template: &str,
    mut f: impl FnMut(&str, &str) -> Result<Option<String>>,
) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    for chunk in template.split("--") {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        let (flag, src) = if let Some(rest) = chunk.strip_prefix("time ") {
            ("time", rest.trim())
        } else if let Some(rest) = chunk.strip_prefix("mem ") {
            ("mem", rest.trim())
        } else {
            parts.push(format!("--{chunk}"));
            continue;
        };
        match f(flag, src)? {
            Some(rendered) => parts.push(format!("--{flag} {rendered}")),
            None => parts.push(format!("--{flag} {src}")),
        }
    }
    Ok(parts.join(" "))
}

/// Seconds to scheduler time syntax: `H:MM:SS`, with a `D-` prefix once the
/// duration crosses a day. Fractional seconds are truncated.
fn format_duration(seconds: f64) -> String {
    let total = seconds as i64;
    let days = total / 86_400;
    let rest = total % 86_400;
    let hours = rest / 3_600;
    let minutes = (rest % 3_600) / 60;
    let secs = rest % 60;
    if days > 0 {
        format!("{days}-{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours}:{minutes:02}:{secs:02}")
    }
}

/// Bytes to the rounded single-letter binary magnitude the scheduler takes
/// for `--mem`, e.g. `10485760 -> 10M`.
fn binary_size(bytes: f64) -> String {
    const SUFFIXES: [&str; 9] = ["B", "K", "M", "G", "T", "P", "E", "Z", "Y"];
    let mut value = bytes;
    let mut magnitude = 0;
    while value >= 1024.0 && magnitude < SUFFIXES.len() - 1 {
        value /= 1024.0;
        magnitude += 1;
    }
    format!("{:.0}{}", value, SUFFIXES[magnitude])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(samples: Option<u64>) -> Shape {
        Shape {
            samples,
            columns: None,
            input_size: None,
        }
    }

    #[test]
    fn substitutes_time_and_mem() {
        let s = substitute(
            "--time {samples}*60 --mem {samples}*1024*1024",
            &shape(Some(10)),
        )
        .unwrap();
        assert_eq!(s, "--time 0:10:00 --mem 10M");
    }

    #[test]
    fn leaves_plain_fragments_alone() {
        let s = substitute(
            "--qos large --time {samples}*60 --nice 10",
            &shape(Some(120)),
        )
        .unwrap();
        assert_eq!(s, "--qos large --time 2:00:00 --nice 10");
    }

    #[test]
    fn missing_shape_variable_fails() {
        assert!(substitute("--time {samples}*60", &shape(None)).is_err());
    }

    #[test]
    fn non_positive_results_fail() {
        assert!(substitute("--time {samples}-100", &shape(Some(10))).is_err());
    }

    #[test]
    fn duration_rendering() {
        assert_eq!(format_duration(600.0), "0:10:00");
        assert_eq!(format_duration(30.0), "0:00:30");
        assert_eq!(format_duration(86_430.0), "1-0:00:30");
        assert_eq!(format_duration(600.9), "0:10:00");
    }

    #[test]
    fn size_rendering() {
        assert_eq!(binary_size(300.0), "300B");
        assert_eq!(binary_size(10.0 * 1024.0 * 1024.0), "10M");
        assert_eq!(binary_size(3.0 * 1024.0 * 1024.0 * 1024.0), "3G");
    }

    #[test]
    fn templates_are_validated() {
        validate_template("--time 4380 --mem 16G").unwrap();
        validate_template("--time {samples}*120+3600").unwrap();
        assert!(validate_template("--time {samples}**2").is_err());
        assert!(validate_template("--mem {bogus}*2").is_err());
    }
}

#[cfg(test)]
mod resolver_tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::db::Store;
    use crate::job::JobStatus;
    use crate::job::ParameterValue;
    use crate::job::Parameters;
    use crate::job::ProcessingJob;
    use crate::testutil;
    use crate::testutil::TestBed;

    fn resolve_job(ctx: &crate::context::Context, job: &ProcessingJob) -> Resolved {
        resolve(ctx, &ctx.store().job(job.id()).unwrap()).unwrap()
    }

    fn command_job(ctx: &crate::context::Context, user: &str) -> ProcessingJob {
        let params = Parameters::new(
            testutil::CMD_CHILD,
            BTreeMap::from([(
                "reference".to_string(),
                ParameterValue::scalar("gg_13_8"),
            )]),
        );
        ProcessingJob::create(ctx, user, params, true).unwrap()
    }

    #[test]
    fn falls_back_to_the_class_default_row() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation("default", "RESOURCE_PARAMS_COMMAND", "--time 4380")
            .unwrap();

        let job = command_job(&ctx, testutil::USER);
        assert_eq!(
            resolve_job(&ctx, &job),
            Resolved::Allocation("--time 4380".to_string())
        );
    }

    #[test]
    fn a_named_row_wins_over_the_default() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation("default", "RESOURCE_PARAMS_COMMAND", "--time 4380")
            .unwrap();
        store
            .set_allocation(
                "Pick closed-reference OTUs",
                "RESOURCE_PARAMS_COMMAND",
                "--time 9000 --mem 16G",
            )
            .unwrap();

        let job = command_job(&ctx, testutil::USER);
        assert_eq!(
            resolve_job(&ctx, &job),
            Resolved::Allocation("--time 9000 --mem 16G".to_string())
        );
    }

    #[test]
    fn missing_rows_are_a_hard_error() {
        let TestBed { ctx, .. } = testutil::testbed();
        let job = command_job(&ctx, testutil::USER);
        let err = resolve(&ctx, &ctx.store().job(job.id()).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
        assert!(err.to_string().contains("resource allocation"));
    }

    #[test]
    fn user_extras_are_appended() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation("default", "RESOURCE_PARAMS_COMMAND", "--time 4380")
            .unwrap();

        let job = command_job(&ctx, testutil::POWER_USER);
        assert_eq!(
            resolve_job(&ctx, &job),
            Resolved::Allocation("--time 4380 --qos special".to_string())
        );
    }

    #[test]
    fn analysis_reservations_are_appended() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation("default", "RESOURCE_PARAMS_COMMAND", "--time 4380")
            .unwrap();

        let params = Parameters::new(
            testutil::CMD_CHILD,
            BTreeMap::from([(
                "in".to_string(),
                ParameterValue::scalar(testutil::ARTIFACT_ANALYSIS.to_string()),
            )]),
        );
        let job = ProcessingJob::create(&ctx, testutil::USER, params, true).unwrap();
        assert_eq!(
            resolve_job(&ctx, &job),
            Resolved::Allocation("--time 4380 --reservation microbiome".to_string())
        );
    }

    #[test]
    fn validator_class_resolves_shape_from_the_preparation() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation(
                "BIOM",
                "VALIDATOR",
                "--time {samples}*60 --mem {samples}*1024*1024",
            )
            .unwrap();

        let params = Parameters::new(
            testutil::CMD_VALIDATE_BIOM,
            BTreeMap::from([
                ("artifact_type".to_string(), ParameterValue::scalar("BIOM")),
                (
                    "template".to_string(),
                    ParameterValue::scalar(testutil::PREP.to_string()),
                ),
            ]),
        );
        let job = ProcessingJob::create(&ctx, testutil::USER, params, true).unwrap();
        assert_eq!(
            resolve_job(&ctx, &job),
            Resolved::Allocation("--time 0:10:00 --mem 10M".to_string())
        );
    }

    #[test]
    fn unsatisfiable_templates_fail_the_job_as_not_valid() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation("default", "RESOURCE_PARAMS_COMMAND", "--time {samples}*60")
            .unwrap();

        // no inputs, no template: the job has no samples to speak of
        let job = command_job(&ctx, testutil::USER);
        let allocation = job.resource_allocation_info(&ctx).unwrap();

        assert_eq!(allocation, NOT_VALID);
        assert_eq!(job.status(&ctx).unwrap(), JobStatus::Error);
        let log = job.log(&ctx).unwrap().expect("log attached");
        assert!(ctx
            .log()
            .message(log)
            .unwrap()
            .contains("Obvious incorrect allocation"));
    }

    #[test]
    fn release_validators_class_is_named_after_the_validated_command() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation(
                "Split libraries",
                "RELEASE_VALIDATORS_RESOURCE_PARAM",
                "--mem 2G",
            )
            .unwrap();

        let target =
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), true)
                .unwrap();
        let params = Parameters::new(
            testutil::CMD_RELEASE,
            BTreeMap::from([(
                "job".to_string(),
                ParameterValue::scalar(target.id().to_string()),
            )]),
        );
        let release = ProcessingJob::create(&ctx, testutil::USER, params, true).unwrap();
        assert_eq!(
            resolve_job(&ctx, &release),
            Resolved::Allocation("--mem 2G".to_string())
        );
    }

    #[test]
    fn complete_job_class_is_named_after_the_payload_artifact_type() {
        let TestBed { ctx, store, .. } = testutil::testbed();
        store
            .set_allocation("BIOM", "COMPLETE_JOBS_RESOURCE_PARAM", "--mem 1G")
            .unwrap();

        let target =
            ProcessingJob::create(&ctx, testutil::USER, testutil::transform_params(), true)
                .unwrap();
        let payload = serde_json::json!({
            "job_id": target.id().to_string(),
            "artifacts": {"o1": {"artifact_type": "BIOM"}},
        });
        let params = Parameters::new(
            testutil::CMD_COMPLETE,
            BTreeMap::from([(
                "payload".to_string(),
                ParameterValue::scalar(payload.to_string()),
            )]),
        );
        let job = ProcessingJob::create(&ctx, testutil::USER, params, true).unwrap();
        assert_eq!(
            resolve_job(&ctx, &job),
            Resolved::Allocation("--mem 1G".to_string())
        );
    }
}
