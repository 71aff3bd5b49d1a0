/// Token-coherent ring: conservation, merge round trip, update snoops.
pub mod coma;

/// Flat backends: timing, rejection, snoop veto.
pub mod flat;
