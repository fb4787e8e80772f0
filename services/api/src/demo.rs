use crate::infra::{
    in_memory_collaborators, InMemoryPeople, InMemoryTaskService, LoggingNotifier, DEMO_COHORT,
    OPERATIONS_ACTOR,
};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use voucher_ledger::error::AppError;
use voucher_ledger::workflows::assignments::LedgerError;
use voucher_ledger::workflows::domain::{
    ActorId, CandidateId, CandidateListId, ProviderId, ServiceCode, ServiceKey,
};
use voucher_ledger::workflows::inventory::ImportSummary;
use voucher_ledger::workflows::lifecycle::SweepReport;
use voucher_ledger::workflows::providers::{ProviderCatalogue, ACCREDIT};
use voucher_ledger::workflows::{Delivery, LedgerServices};

const DEFAULT_SWEEP_AFTER_DAYS: u32 = 45;
const IMPORT_DATE_FORMAT: &str = "%Y/%m/%d %H:%M";

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// Provider the export belongs to (e.g. accredit, langcert)
    pub(crate) provider: String,
    /// Service code of the target pool (e.g. proctored, non-proctored, speaking)
    pub(crate) service_code: ServiceCode,
    /// CSV export with Coupon Code, Expiration Date, Date Sent and Coupon Status columns
    pub(crate) file: PathBuf,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Accredit proctored export to use instead of the synthetic inventory
    #[arg(long)]
    pub(crate) inventory: Option<PathBuf>,
    /// Days to fast-forward before running the expiry sweep (defaults to 45)
    #[arg(long)]
    pub(crate) sweep_after_days: Option<u32>,
}

pub(crate) fn run_import(args: ImportArgs) -> Result<(), AppError> {
    let ImportArgs {
        provider,
        service_code,
        file,
    } = args;
    let key = ServiceKey::new(provider, service_code);
    let wiring = demo_services()?;
    let summary = import_into(&wiring.services, &key, File::open(&file)?)?;

    println!("Inventory import dry run for {}", file.display());
    render_import(&summary);
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let walkthrough = walkthrough(args, Utc::now())?;

    println!("Voucher ledger demo");
    render_import(&walkthrough.import);

    println!("\nCohort '{DEMO_COHORT}' assignment");
    for line in &walkthrough.cohort {
        println!("  - {line}");
    }
    for line in &walkthrough.steps {
        println!("- {line}");
    }

    let sweep = &walkthrough.sweep;
    println!(
        "\nExpiry sweep at {}: {} due | {} resource(s) expired | {} assignment(s) expired | {} error(s)",
        walkthrough.swept_at.format("%Y-%m-%d"),
        sweep.selected,
        sweep.resources_expired,
        sweep.assignments_expired,
        sweep.errors
    );

    println!("\nFollow-up tasks");
    for task in walkthrough.tasks.tasks() {
        let state = if task.active {
            "active".to_string()
        } else {
            format!(
                "retired ({})",
                task.inactive_reason.as_deref().unwrap_or("no reason")
            )
        };
        println!("  - {} {} -> {}", task.candidate_id, task.task_name, state);
    }

    println!("Notifications");
    for notification in walkthrough.notifier.sent() {
        println!(
            "  - {} to {} for {}",
            notification.template, notification.recipient, notification.assignment.resource_code
        );
    }

    let stats = walkthrough.services.orchestrator.stats();
    println!(
        "Lifecycle handler: {} events | {} tasks created | {} retired | {} notified | {} failures",
        stats.events_handled,
        stats.tasks_created,
        stats.tasks_retired,
        stats.notifications_sent,
        stats.failures
    );

    let remaining = walkthrough
        .services
        .queries
        .available_count(&ProviderId::new(ACCREDIT), None)?;
    println!("{remaining} accredit resource(s) still available");
    Ok(())
}

pub(crate) struct Walkthrough {
    pub(crate) services: LedgerServices,
    pub(crate) tasks: InMemoryTaskService,
    pub(crate) notifier: LoggingNotifier,
    pub(crate) import: ImportSummary,
    pub(crate) cohort: Vec<String>,
    pub(crate) steps: Vec<String>,
    pub(crate) sweep: SweepReport,
    pub(crate) swept_at: DateTime<Utc>,
}

struct DemoWiring {
    services: LedgerServices,
    tasks: InMemoryTaskService,
    notifier: LoggingNotifier,
}

fn demo_services() -> Result<DemoWiring, AppError> {
    let wiring = in_memory_collaborators(InMemoryPeople::demo_roster());
    let (services, _) = LedgerServices::assemble(
        ProviderCatalogue::builtin(),
        wiring.collaborators,
        Delivery::Inline,
    )?;
    Ok(DemoWiring {
        services,
        tasks: wiring.tasks,
        notifier: wiring.notifier,
    })
}

fn import_into<R: Read>(
    services: &LedgerServices,
    key: &ServiceKey,
    reader: R,
) -> Result<ImportSummary, AppError> {
    let summary = services
        .import(key, reader)
        .ok_or_else(|| LedgerError::NoSuchObject(format!("no service registered for {key}")))??;
    Ok(summary)
}

/// Imports, assigns the demo cohort, exercises each ledger operation once and sweeps.
pub(crate) fn walkthrough(args: DemoArgs, today: DateTime<Utc>) -> Result<Walkthrough, AppError> {
    let DemoWiring {
        services,
        tasks,
        notifier,
    } = demo_services()?;
    let key = ServiceKey::new(ACCREDIT, ServiceCode::Proctored);
    let operator = ActorId(OPERATIONS_ACTOR.to_string());

    let import = match args.inventory {
        Some(path) => import_into(&services, &key, File::open(path)?)?,
        None => import_into(&services, &key, Cursor::new(synthetic_inventory(today)))?,
    };

    let outcomes = services.ledger.assign_to_list(
        &key,
        &CandidateListId(DEMO_COHORT.to_string()),
        Some(&operator),
    )?;
    let mut cohort = Vec::with_capacity(outcomes.len());
    let mut assigned = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(assignment) => {
                cohort.push(format!(
                    "{} received {}",
                    outcome.candidate_id, assignment.resource_code
                ));
                assigned.push(assignment);
            }
            Err(err) => cohort.push(format!("{} not assigned: {err}", outcome.candidate_id)),
        }
    }

    let mut steps = Vec::new();
    if let Some(assignment) = assigned.get(1) {
        let resource = services.ledger.mark_sent(assignment.id, Some(&operator))?;
        steps.push(format!("{} marked sent to {}", resource.code, assignment.candidate_id));
    }
    if let Some(assignment) = assigned.get(2) {
        let redeemed = services.ledger.redeem(assignment.id, Some(&operator))?;
        steps.push(format!(
            "{} redeemed by {}",
            redeemed.resource_code, redeemed.candidate_id
        ));
    }
    if let Some(assignment) = assigned.get(3) {
        match services
            .ledger
            .reassign(&key, &assignment.candidate_id, Some(&operator))
        {
            Ok(replacement) => steps.push(format!(
                "{} reassigned from {} to {}",
                replacement.candidate_id, assignment.resource_code, replacement.resource_code
            )),
            Err(err) => steps.push(format!(
                "reassignment for {} failed: {err}",
                assignment.candidate_id
            )),
        }
    }
    let walk_in = CandidateId("cand-5".to_string());
    if let Err(err) = services.ledger.assign_to_candidate(&key, &walk_in, None) {
        steps.push(format!("assignment without an operator rejected: {err}"));
    }

    let days = args.sweep_after_days.unwrap_or(DEFAULT_SWEEP_AFTER_DAYS);
    let swept_at = today + Duration::days(i64::from(days));
    let sweep = services.sweeper.sweep(swept_at, None)?;

    Ok(Walkthrough {
        services,
        tasks,
        notifier,
        import,
        cohort,
        steps,
        sweep,
        swept_at,
    })
}

/// One short-dated code, four long-dated ones and a non-proctored code the prefix rule reroutes.
fn synthetic_inventory(today: DateTime<Utc>) -> String {
    let soon = (today + Duration::days(30)).format(IMPORT_DATE_FORMAT);
    let later = (today + Duration::days(365)).format(IMPORT_DATE_FORMAT);
    let mut csv = String::from("Coupon Code,Expiration Date,Date Sent,Coupon Status\n");
    csv.push_str(&format!("ACC-1001,{soon},,\n"));
    for code in ["ACC-1002", "ACC-1003", "ACC-1004", "ACC-1005"] {
        csv.push_str(&format!("{code},{later},,\n"));
    }
    csv.push_str(&format!("NONP-2001,{later},,\n"));
    csv
}

fn render_import(summary: &ImportSummary) {
    println!("- {}", summary.message());
    for (service_code, count) in &summary.by_service_code {
        println!("  - {service_code}: {count}");
    }
}
