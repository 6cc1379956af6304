// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Four commands are supported:
//   1. `train`    — trains a tagger, optionally tests it
//   2. `test`     — evaluates a saved tagger on test files
//   3. `ensemble` — combines several saved taggers
//   4. `norms`    — prints head weight norms of a saved tagger
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EnsembleArgs, NormsArgs, TestArgs, TrainArgs};

use crate::application::test_use_case::TestReport;
use crate::ml::evaluator::format_accuracies;

#[derive(Parser, Debug)]
#[command(
    name = "multitask-tagger",
    version = "0.1.0",
    about = "Multi-task bi-LSTM sequence tagger with adaptive output-head ensembles."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

fn print_tests(reports: &[TestReport]) {
    for r in reports {
        println!(
            "Task{} test accuracy on {} items: {}",
            r.task,
            r.sentences,
            format_accuracies(&r.evaluation.accuracies())
        );
    }
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Test(args) => run_test(args),
            Commands::Ensemble(args) => run_ensemble(args),
            Commands::Norms(args) => run_norms(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Training on {} task file(s)", args.train.len());
    let outcome = TrainUseCase::new(args.into()).execute()?;

    if let Some(acc) = outcome.report.dev_accuracies.last() {
        println!("Final dev accuracy: {}", format_accuracies(acc));
    }
    print_tests(&outcome.tests);
    println!("Training complete after {} epochs.", outcome.report.epochs_run);
    Ok(())
}

fn run_test(args: TestArgs) -> Result<()> {
    use crate::application::test_use_case::TestUseCase;

    let reports = TestUseCase::new(args.into()).execute()?;
    print_tests(&reports);
    Ok(())
}

fn run_ensemble(args: EnsembleArgs) -> Result<()> {
    use crate::application::ensemble_use_case::EnsembleUseCase;

    let report = EnsembleUseCase::new(args.into()).execute()?;
    println!(
        "Ensemble of {} models: accuracy {:.4} ({} / {})",
        report.members,
        report.tally.accuracy(),
        report.tally.correct,
        report.tally.total
    );
    Ok(())
}

fn run_norms(args: NormsArgs) -> Result<()> {
    use crate::application::inspect_use_case::InspectUseCase;

    let norms = InspectUseCase::new(args.model).head_norms()?;
    for (i, norm) in norms.iter().enumerate() {
        println!("head {i}\t{norm:.4}");
    }
    Ok(())
}
