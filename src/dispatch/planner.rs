use std::num::NonZeroUsize;

/// A run of consecutive recipients sent in one transmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Batch<'a> {
    /// Position of the batch in the full plan, counting from zero.
    pub index: usize,
    pub recipients: &'a [String],
}

pub fn total_batches(recipients: usize, batch_size: NonZeroUsize) -> usize {
    recipients.div_ceil(batch_size.get())
}

/// Splits `recipients` into batches of `batch_size` and drops the first
/// `resume_from` of them, which an earlier attempt already sent.
pub fn plan_batches(
    recipients: &[String],
    batch_size: NonZeroUsize,
    resume_from: usize,
) -> Vec<Batch<'_>> {
    recipients
        .chunks(batch_size.get())
        .enumerate()
        .skip(resume_from)
        .map(|(index, recipients)| Batch { index, recipients })
        .collect()
}
