/// All possible errors emitted by the driver
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<SpiError, PinError> {
    /// Internal Spi error
    Spi(SpiError),

    /// A control line could not be driven
    Pin(PinError),

    /// Address out of bound
    OutOfBounds,

    /// The device stayed busy past the configured poll limit
    Timeout,
}
