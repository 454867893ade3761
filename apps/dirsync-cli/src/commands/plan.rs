//! `plan` subcommand: dry run.

use clap::Args;

use dirsync_engine::{compute_plan, Disposition, PlanOptions};

use crate::commands::common::{LdapArgs, TestOpsArgs};
use crate::error::CliResult;

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub ldap: LdapArgs,

    #[command(flatten)]
    pub testops: TestOpsArgs,

    /// Plan deletes for managed users absent from the directory
    #[arg(long, env = "SYNC_PRUNE")]
    pub prune: bool,

    /// Print the plan as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: PlanArgs) -> CliResult<()> {
    let principals = args.ldap.read_directory().await?;
    let client = args.testops.to_client()?;
    let remote = crate::commands::common::read_remote(&client).await?;

    let plan = compute_plan(
        &principals,
        &remote,
        &PlanOptions {
            prune_absent: args.prune,
        },
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    for planned in &plan.ops {
        match planned.disposition {
            Disposition::Apply => println!("apply  {}", planned.op),
            Disposition::Skip(reason) => println!("skip   {} ({reason})", planned.op),
        }
    }
    for anomaly in &plan.anomalies {
        println!("anomaly: {anomaly}");
    }
    if plan.is_converged() {
        println!("already converged, nothing to apply");
    } else {
        println!("{} operation(s) to apply", plan.pending_ops());
    }

    Ok(())
}
