mod backend_planner;

pub use backend_planner::{BackendPlan, BackendPlanner, PlanSkip, ProxyCommand};
