use plccore::iss::SensorReadings;
use plccore::peripheral::{PeripheralResult, Reactor};

/// In-process stand-in for the reactor hardware so a node can run
/// without a simulated world attached. The thermal response is a crude
/// function of the commanded burn rate.
pub struct SimReactor {
    running: bool,
    burn_rate: u32,
}

impl SimReactor {
    pub fn new() -> SimReactor {
        SimReactor {
            running: false,
            burn_rate: 0,
        }
    }
}

impl Reactor for SimReactor {
    fn running(&self) -> PeripheralResult<bool> {
        Ok(self.running)
    }

    fn scram(&mut self) -> PeripheralResult<()> {
        self.running = false;
        Ok(())
    }

    fn activate(&mut self) -> PeripheralResult<()> {
        self.running = true;
        Ok(())
    }

    fn set_burn_rate(&mut self, rate: u32) -> PeripheralResult<()> {
        self.burn_rate = rate;
        Ok(())
    }

    fn sensors(&self) -> PeripheralResult<SensorReadings> {
        let temp_k = if self.running {
            300 + self.burn_rate * 2
        } else {
            300
        };

        Ok(SensorReadings {
            temp_k,
            ..SensorReadings::default()
        })
    }

    fn structure(&self) -> PeripheralResult<Vec<u32>> {
        // Formed structure dimensions: width, length, height.
        Ok(vec![5, 5, 9])
    }
}
