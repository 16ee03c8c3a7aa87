use lte_core::Tti;

pub trait RrcInterfaceMac: Send + Sync {
    /// Time alignment lost or SR attempts exhausted: PUCCH and SRS must be released
    fn release_pucch_srs(&self);

    /// Random access gave up after `preambleTransMax` attempts
    fn ra_problem(&self);

    /// Outcome of a random access triggered by handover
    fn ho_ra_completed(&self, ra_successful: bool);

    /// Called at the end of every MAC tick
    fn run_tti(&self, _tti: Tti) {}
}
