//! Steady-state interrupt behavior: the mask/unmask protocol between the top-half
//! handler and the user-facing irq-control entry point.

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;

use ruio_pci::{IntrModeKind, PreferredMode, UioPciDevice};
use ruio_platform::sim::{FaultPlan, SimFunctionConfig, SimPciFunction};
use ruio_platform::IrqReturn;

fn attach_msix() -> (Arc<SimPciFunction>, Arc<UioPciDevice<SimPciFunction>>) {
    let function = SimPciFunction::new(SimFunctionConfig::default());
    let device = UioPciDevice::attach(Arc::clone(&function), PreferredMode::Msix).unwrap();
    assert_eq!(device.mode(), IntrModeKind::Msix);
    (function, device)
}

fn attach_legacy() -> (Arc<SimPciFunction>, Arc<UioPciDevice<SimPciFunction>>) {
    let function = SimPciFunction::new(SimFunctionConfig {
        msix_vectors: 0,
        ..Default::default()
    });
    let device = UioPciDevice::attach(Arc::clone(&function), PreferredMode::Msix).unwrap();
    assert_eq!(device.mode(), IntrModeKind::Legacy);
    (function, device)
}

#[test]
fn device_comes_up_masked() {
    let (function, device) = attach_msix();
    assert!(function.vector_masked(0));
    assert!(device.msix_vectors().unwrap()[0].masked());

    let (function, _device) = attach_legacy();
    assert!(function.intx_disabled());
}

#[test]
fn irqcontrol_round_trip_unmasks_and_remasks() {
    let (function, device) = attach_msix();

    device.irqcontrol(1);
    assert!(!function.vector_masked(0));

    device.irqcontrol(0);
    assert!(function.vector_masked(0));
}

#[test]
fn irqcontrol_is_idempotent_against_hardware() {
    let (function, device) = attach_msix();
    let after_attach = function.table_write_count();

    device.irqcontrol(0);
    assert_eq!(
        function.table_write_count(),
        after_attach,
        "already masked, no write issued"
    );

    device.irqcontrol(1);
    device.irqcontrol(1);
    assert_eq!(function.table_write_count(), after_attach + 1);
}

#[test]
fn every_mask_write_is_flushed() {
    let (function, device) = attach_msix();
    device.irqcontrol(1);
    device.irqcontrol(0);
    assert_eq!(
        function.table_read_count(),
        function.table_write_count(),
        "one read-back per posted write"
    );
}

#[test]
fn handler_masks_the_source_and_reports_handled() {
    let (function, device) = attach_msix();
    device.irqcontrol(1);
    assert!(!function.vector_masked(0));

    assert_eq!(function.trigger(), Some(IrqReturn::Handled));
    assert!(
        function.vector_masked(0),
        "source stays masked until user space re-enables it"
    );
}

#[test]
fn legacy_handler_claims_own_interrupt_and_disables_the_line() {
    let (function, device) = attach_legacy();
    device.irqcontrol(1);
    assert!(!function.intx_disabled());

    assert_eq!(function.raise_intx(), Some(IrqReturn::Handled));
    assert!(function.intx_disabled());
}

#[test]
fn legacy_handler_leaves_foreign_interrupts_alone() {
    let (function, device) = attach_legacy();
    device.irqcontrol(1);
    function.set_status_interrupt(false);
    let writes_before = function.config_write_count();

    // Another device on the shared line fired; our pending bit is clear.
    assert_eq!(function.trigger(), Some(IrqReturn::NotMine));
    assert!(!function.intx_disabled(), "mask state untouched");
    assert_eq!(
        function.config_write_count(),
        writes_before,
        "ownership test is read-only"
    );
}

#[test]
fn legacy_round_trip_restores_the_command_register() {
    let (function, device) = attach_legacy();
    let masked_command = function.command();

    device.irqcontrol(1);
    device.irqcontrol(0);
    assert_eq!(function.command(), masked_command);
}

#[test]
fn transient_config_fault_leaves_mask_state_unchanged() {
    let (function, device) = attach_legacy();
    assert!(function.intx_disabled());

    function.set_faults(FaultPlan {
        config_io: true,
        ..Default::default()
    });
    device.irqcontrol(1);
    assert!(function.intx_disabled(), "failed update is not applied");

    function.set_faults(FaultPlan::default());
    device.irqcontrol(1);
    assert!(!function.intx_disabled());
}

#[test]
fn concurrent_handler_and_irqcontrol_keep_mirror_and_hardware_consistent() {
    let (function, device) = attach_msix();

    let masker = {
        let function = Arc::clone(&function);
        thread::spawn(move || {
            for _ in 0..200 {
                function.trigger();
            }
        })
    };
    let unmasker = {
        let device = Arc::clone(&device);
        thread::spawn(move || {
            for _ in 0..200 {
                device.irqcontrol(1);
            }
        })
    };
    masker.join().unwrap();
    unmasker.join().unwrap();

    // Whichever interleaving happened, the mirror must agree with the device.
    let mirror = device.msix_vectors().unwrap()[0].masked();
    assert_eq!(mirror, function.vector_masked(0));
}
