/// Execute an aggregate command deterministically (no IO).
///
/// Decides the events with `handle`, then evolves the aggregate by applying each of
/// them in order. On error the aggregate is left untouched.
///
/// This is the single step every unit of work in the clinic uses to move a record
/// through its state machine; persistence and notifications stay with the caller.
pub fn execute<A>(
    aggregate: &mut A,
    command: &A::Command,
) -> Result<Vec<A::Event>, A::Error>
where
    A: clinicflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
