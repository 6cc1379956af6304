// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the cross-cutting concerns that don't belong in any
// specific business layer:
//
//   checkpoint.rs  — ModelStore: saves and loads weights (Burn
//                    recorder) plus the JSON metadata needed to
//                    rebuild the architecture, loss logs and the
//                    run configuration
//
//   metrics.rs     — per-epoch train loss and dev accuracies
//                    written to a CSV file
//
//   predictions.rs — token-level prediction files
//
// Reference: Burn Book §5 (Records and Checkpointing)

/// Model saving and loading under a path prefix
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Tab-separated prediction writer
pub mod predictions;
