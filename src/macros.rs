/// Builds a [`BoxedAction`](crate::job::BoxedAction) from an async block.
///
/// The optional setup block runs synchronously on every invocation, before the
/// future is created. Use it to clone shared handles the async block moves.
/// The main block runs with the executing job bound to the given identifier
/// and must evaluate to [`ActionResult`](crate::job::ActionResult).
///
/// # Usage
///
/// ```ignore
/// # use jobgate::job_action;
/// # use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
/// # let counter = Arc::new(AtomicUsize::new(0));
/// let action = job_action! {
///     { let counter = counter.clone(); }
///     |job| {
///         counter.fetch_add(1, Ordering::SeqCst);
///         tracing::info!(job_id = ?job.id(), "counted");
///         Ok(())
///     }
/// };
///
/// let job = jobgate::Job::builder().boxed_action(action).build();
/// ```
#[macro_export]
macro_rules! job_action {
    (
        { $($setup_stmts:stmt);* $(;)? }
        |$job:ident| $main_block:block
    ) => {{
        let action: $crate::job::BoxedAction = std::sync::Arc::new(move |$job: $crate::job::Job| {
            $($setup_stmts;)*
            Box::pin(async move {
                let result: $crate::job::ActionResult = $main_block;
                result
            }) as $crate::job::ActionFuture
        });
        action
    }};

    (
        |$job:ident| $main_block:block
    ) => {{
        let action: $crate::job::BoxedAction = std::sync::Arc::new(move |$job: $crate::job::Job| {
            Box::pin(async move {
                let result: $crate::job::ActionResult = $main_block;
                result
            }) as $crate::job::ActionFuture
        });
        action
    }};
}
