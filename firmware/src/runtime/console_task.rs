use embassy_futures::join::join;
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};
use static_cell::StaticCell;

use super::{CONSOLE_LINES, CONSOLE_REPLIES};
use crate::console::LineAssembler;
use crate::telemetry;

const CONSOLE_BAUD: u32 = 115_200;
const UART_BUFFER_SIZE: usize = 256;
const READ_CHUNK: usize = 32;
const ERROR_BACKOFF: Duration = Duration::from_millis(5);

static UART_TX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

/// Moves console lines between USART5 and the main loop.
#[embassy_executor::task]
pub async fn run(
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        UART_TX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; UART_BUFFER_SIZE]),
        UartIrqs,
        config,
    )
    .expect("failed to initialize console UART");

    let (mut uart_tx, mut uart_rx) = uart.split();
    let lines = CONSOLE_LINES.sender();
    let replies = CONSOLE_REPLIES.receiver();

    let inbound = async move {
        let mut assembler = LineAssembler::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match uart_rx.read(&mut chunk).await {
                Ok(count) => {
                    for &byte in &chunk[..count] {
                        match assembler.ingest(byte) {
                            Ok(Some(line)) => lines.send(line).await,
                            Ok(None) => {}
                            Err(error) => telemetry::console_rejected(error),
                        }
                    }
                }
                Err(_) => {
                    defmt::warn!("console: UART read error");
                    Timer::after(ERROR_BACKOFF).await;
                }
            }
        }
    };

    let outbound = async move {
        loop {
            let reply = replies.receive().await;
            let written = async {
                uart_tx.write_all(reply.as_bytes()).await?;
                uart_tx.write_all(b"\r\n").await?;
                uart_tx.flush().await
            };
            if written.await.is_err() {
                defmt::warn!("console: UART write error");
                Timer::after(ERROR_BACKOFF).await;
            }
        }
    };

    join(inbound, outbound).await;
    loop {
        core::future::pending::<()>().await;
    }
}
