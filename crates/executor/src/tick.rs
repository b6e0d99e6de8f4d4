use rust_decimal::Decimal;

/// Floors `value` to a multiple of `tick`. Never rounds up.
///
/// A non-positive `tick` leaves the value untouched.
pub fn floor_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).floor() * tick
}

/// Same grid arithmetic for quantities and the lot step size.
pub fn floor_to_step(quantity: Decimal, step: Decimal) -> Decimal {
    floor_to_tick(quantity, step)
}
