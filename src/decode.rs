//! Decoding captured answers into caller results.
//!
//! The bridge treats answer data as opaque. Turning a raw answer buffer or
//! a host record into whatever the caller wants to see is the job of a
//! [`ResultDecoder`] supplied when the channel is created. The one piece of
//! decode logic that lives here is the expansion of `ANY` lookups, which
//! runs the decoder over a fixed sequence of record types against the same
//! answer buffer.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::engine::{HostRecord, RecordType, Status};

//------------ ResultDecoder -------------------------------------------------

/// Turns captured engine answers into caller visible results.
///
/// The driver owns one decoder per channel and calls it on its own task,
/// so implementations get `&self` and may keep per-channel state behind
/// interior mutability if they need any.
pub trait ResultDecoder: Send + 'static {
    /// The result type delivered to callers.
    ///
    /// A fresh value is created for every query and filled by the decode
    /// methods. For `ANY` lookups the same value accumulates the output
    /// of several decode passes.
    type Output: Default + Send + 'static;

    /// Decodes a raw answer buffer for the given record type into `out`.
    ///
    /// Returning [`Status::NoData`] means the answer holds no records of
    /// this type. For plain lookups that fails the query; within an `ANY`
    /// expansion it merely skips the pass.
    fn decode(
        &self,
        rtype: RecordType,
        answer: &[u8],
        out: &mut Self::Output,
    ) -> Result<(), Status>;

    /// Fills `out` from the host record of a reverse lookup.
    fn host_names(&self, record: &HostRecord, out: &mut Self::Output);
}

//------------ ANY expansion -------------------------------------------------

/// The decode passes an `ANY` lookup runs, in order.
const ANY_PASSES: &[RecordType] = &[
    RecordType::AOrCname,
    RecordType::Aaaa,
    RecordType::Mx,
    RecordType::Ns,
    RecordType::Txt,
    RecordType::Srv,
    RecordType::Ptr,
    RecordType::Naptr,
    RecordType::Soa,
    RecordType::Caa,
];

/// Decodes an `ANY` answer by running every pass over the same buffer.
///
/// A pass reporting [`Status::NoData`] is skipped, since an `ANY` answer
/// rarely carries every record type. Any other decode failure aborts the
/// expansion with that status. `out` keeps whatever the passes that ran
/// before the failure produced.
pub(crate) fn decode_any<D: ResultDecoder>(
    decoder: &D,
    answer: &[u8],
    out: &mut D::Output,
) -> Result<(), Status> {
    for &pass in ANY_PASSES {
        match decoder.decode(pass, answer, out) {
            Ok(()) | Err(Status::NoData) => {}
            Err(status) => return Err(status),
        }
    }
    Ok(())
}

//============ Tests =========================================================
