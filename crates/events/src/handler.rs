/// Execute an aggregate command deterministically (no IO, no persistence).
///
/// Decide (`handle`) then evolve (`apply`) in one step, mutating the aggregate in
/// place. Domain tests use this to walk an order through its lifecycle; the
/// infra `CommandDispatcher` is the persistent equivalent.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
