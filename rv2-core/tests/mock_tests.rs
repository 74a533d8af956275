use core::cell::RefCell;

use embedded_hal_bus::i2c::RefCellDevice;
use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTrans};
use rv2_core::utils::context::{MotionState, ACTUATOR_COUNT};
use rv2_core::utils::controllers::{
    gripper::{Pca9685Fingers, GRIPPER_PWM_ADDRESS},
    i2c::{CommandBus, I2cCommandBus, CMD_MOVE, CMD_STOP, CMD_VELOCITY, GENERAL_CALL},
    sensor::{resync, AngleSensor, As5600Reader, AS5600_ADDRESS, MUX_ADDRESS, RAW_ANGLE_REGISTER},
};

/// Create a write transaction for the given I2C address and data payload.
pub fn write(
    addr: u8,
    data: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write(addr, data)
}
/// Create a write_read transaction for the given I2C address/payloads.
pub fn write_read(
    addr: u8,
    write: Vec<u8>,
    read: Vec<u8>,
) -> I2cTrans {
    I2cTrans::write_read(addr, write, read)
}

/// Mux select followed by a raw-angle read returning `counts`.
fn angle_read(
    actuator: usize,
    counts: u16,
) -> [I2cTrans; 2] {
    [
        write(MUX_ADDRESS, vec![1 << actuator]),
        write_read(AS5600_ADDRESS, vec![RAW_ANGLE_REGISTER], counts.to_be_bytes().to_vec()),
    ]
}

#[test]
fn movement_command_frame() {
    let mut frame = vec![CMD_MOVE];
    frame.extend_from_slice(&1.5f32.to_le_bytes());
    frame.extend_from_slice(&0.25f32.to_le_bytes());
    let expectations = [write(0x08, frame)];

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut bus = I2cCommandBus::new(RefCellDevice::new(&i2c_bus));
    bus.send_movement(0x08, 1.5, 0.25).unwrap();
    i2c_bus.borrow_mut().done();
}

#[test]
fn stop_is_a_general_call() {
    let expectations = [write(GENERAL_CALL, vec![CMD_STOP])];

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut bus = I2cCommandBus::new(RefCellDevice::new(&i2c_bus));
    bus.send_stop().unwrap();
    i2c_bus.borrow_mut().done();
}

#[test]
fn velocity_readback() {
    let expectations = [write_read(0x0B, vec![CMD_VELOCITY], 9.534f32.to_le_bytes().to_vec())];

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut bus = I2cCommandBus::new(RefCellDevice::new(&i2c_bus));
    assert_eq!(bus.request_velocity(0x0B).unwrap(), 9.534);
    i2c_bus.borrow_mut().done();
}

#[test]
fn encoder_read_selects_mux_channel() {
    // 1024 counts is a quarter turn; the high nibble of the first byte is noise
    let expectations = [
        write(MUX_ADDRESS, vec![1 << 2]),
        write_read(AS5600_ADDRESS, vec![RAW_ANGLE_REGISTER], vec![0xF4, 0x00]),
    ];

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut zero = [0.0; ACTUATOR_COUNT];
    zero[2] = 100.0;
    let mut sensor = As5600Reader::new(RefCellDevice::new(&i2c_bus), zero);
    let angle = sensor.read_angle(2).unwrap();
    approx::assert_abs_diff_eq!(angle, -10.0, epsilon = 1e-4);
    i2c_bus.borrow_mut().done();
}

#[test]
fn encoder_rejects_unknown_actuator() {
    let mock = I2cMock::new(&[]);
    let i2c_bus = RefCell::new(mock);
    let mut sensor = As5600Reader::new(RefCellDevice::new(&i2c_bus), [0.0; ACTUATOR_COUNT]);
    assert!(sensor.read_angle(ACTUATOR_COUNT).is_err());
    i2c_bus.borrow_mut().done();
}

#[test]
fn resync_overwrites_open_loop_positions() {
    // 0, 512 (45°), 2048 (180°), 3072 (270° wraps to -90°), 4095, 1
    let counts = [0u16, 512, 2048, 3072, 4095, 1];
    let expectations: Vec<I2cTrans> = counts
        .iter()
        .enumerate()
        .flat_map(|(i, &c)| angle_read(i, c))
        .collect();

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let mut sensor = As5600Reader::new(RefCellDevice::new(&i2c_bus), [0.0; ACTUATOR_COUNT]);
    let mut motion = MotionState::default();
    motion.current_rotation = [33.0; ACTUATOR_COUNT];

    assert_eq!(resync(&mut sensor, &mut motion), ACTUATOR_COUNT);
    let expected = [0.0, 45.0, 180.0, -90.0, -360.0 / 4096.0, 360.0 / 4096.0];
    for (got, want) in motion.current_rotation.iter().zip(expected) {
        approx::assert_abs_diff_eq!(*got, want, epsilon = 1e-3);
    }
    i2c_bus.borrow_mut().done();
}

#[test]
fn gripper_pwm_configures_servo_frame() {
    // enable, then prescale 121 for 50 Hz (includes sleep handling)
    let expectations = [
        write(GRIPPER_PWM_ADDRESS, vec![0x00, 0x01]),
        write(GRIPPER_PWM_ADDRESS, vec![0x00, 0x11]),
        write(GRIPPER_PWM_ADDRESS, vec![0xFE, 121]),
        write(GRIPPER_PWM_ADDRESS, vec![0x00, 0x01]),
    ];

    let mock = I2cMock::new(&expectations);
    let i2c_bus = RefCell::new(mock);
    let fingers = Pca9685Fingers::new(RefCellDevice::new(&i2c_bus), None);
    assert!(fingers.is_ok());
    i2c_bus.borrow_mut().done();
}
