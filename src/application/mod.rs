// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal (training, testing, ensembling, inspecting).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - No direct tensor access (that's Layer 5)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The training workflow
pub mod train_use_case;

// Evaluation of a saved model on test files
pub mod test_use_case;

// Cross-model ensembling
pub mod ensemble_use_case;

// Head weight norms of a saved model
pub mod inspect_use_case;
