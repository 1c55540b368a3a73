use crate::config::ShipperConfig;
use crate::error::ShipperError;
use crate::layer::StackLayer;
use crate::shipper::Shipper;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Start a [`Shipper`] for `config` and install it as part of the
/// global `tracing` subscriber.
///
/// **Parameters**
/// - `config`: [`ShipperConfig`] selecting the transport and
///   controlling batching and delivery.
///
/// **Returns**
/// - The running [`Shipper`]: open stacks with it and call
///   [`Shipper::flush`] before the process exits.
/// - `Err(..)` if the transport could not be built or initialized, or
///   a global subscriber is already installed.
///
/// Must be called from within a Tokio runtime.
pub async fn init_tracing(config: ShipperConfig) -> Result<Shipper, ShipperError> {
    let enable_stdout = config.enable_stdout;
    let shipper = Shipper::start(config).await?;
    init_tracing_with_shipper(shipper.clone(), enable_stdout)?;
    Ok(shipper)
}

/// Install a [`Registry`] with a [`StackLayer`] feeding `shipper` as the
/// global default subscriber.
///
/// **Parameters**
/// - `shipper`: running [`Shipper`] that receives attributed events.
/// - `enable_stdout`: also print every event through a `fmt` layer.
pub fn init_tracing_with_shipper(shipper: Shipper, enable_stdout: bool) -> Result<(), ShipperError> {
    let layer = StackLayer::new(shipper);

    // Two subscriber shapes because the optional fmt layer changes the type.
    if enable_stdout {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let subscriber = Registry::default().with(layer).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}
