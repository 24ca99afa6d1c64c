//! Program builder: one operator command, one small hub program
//!
//! The hub runs MicroPython. Every program sets up the same devices, performs
//! the motion for the requested command, reads the color sensor, prints the
//! sentinel line, and stops the motors. The steering motor sits on port C,
//! the gripper motor on port F, the color sensor on port E.

use std::fmt;
use std::str::FromStr;

/// One of the fixed robot actions an operator can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubCommand {
    SteerLeft,
    SteerRight,
    Push,
    Pull,
    ReturnToOrigin,
    ReadColor,
}

impl HubCommand {
    /// Motion fragment inserted into the program template.
    ///
    /// `ReadColor` contributes nothing: the shared template already reads
    /// the sensor on every run.
    fn motion_fragment(self) -> &'static str {
        match self {
            HubCommand::SteerLeft => "steer_motor.run_angle(-250, -60)",
            HubCommand::SteerRight => "steer_motor.run_angle(250, -45)",
            HubCommand::Push => "grab_motor.run(500)",
            HubCommand::Pull => "grab_motor.run(-500)",
            HubCommand::ReturnToOrigin => "steer_motor.run_target(250, 0)",
            HubCommand::ReadColor => "",
        }
    }
}

impl fmt::Display for HubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HubCommand::SteerLeft => "steer-left",
            HubCommand::SteerRight => "steer-right",
            HubCommand::Push => "push",
            HubCommand::Pull => "pull",
            HubCommand::ReturnToOrigin => "return-to-origin",
            HubCommand::ReadColor => "read-color",
        };
        f.write_str(name)
    }
}

impl FromStr for HubCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steer-left" | "left" => Ok(HubCommand::SteerLeft),
            "steer-right" | "right" => Ok(HubCommand::SteerRight),
            "push" => Ok(HubCommand::Push),
            "pull" => Ok(HubCommand::Pull),
            "return-to-origin" | "origin" => Ok(HubCommand::ReturnToOrigin),
            "read-color" | "color" => Ok(HubCommand::ReadColor),
            _ => Err(()),
        }
    }
}

/// Build the program text the hub executes for `command`. Pure and total.
pub fn build_program(command: HubCommand) -> String {
    let motion = command.motion_fragment();

    format!(
        r#"from pybricks.hubs import PrimeHub
from pybricks.pupdevices import Motor, ColorSensor
from pybricks.parameters import Port
from pybricks.tools import wait

hub = PrimeHub()

steer_motor = Motor(Port.C)
grab_motor = Motor(Port.F)
color_sensor = ColorSensor(Port.E)

{motion}

color = color_sensor.color()
print("COLOR:", color)

wait(300)
steer_motor.stop()
grab_motor.stop()
"#
    )
}
