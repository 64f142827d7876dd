//! sink.rs — Destino das linhas do relatório

use crate::error::MonitorError;
use crate::types::ReportRow;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Recebe uma linha por loja processada, em qualquer ordem.
pub trait RowSink: Send {
    fn emit(&mut self, row: &ReportRow) -> Result<(), MonitorError>;

    /// Chamado uma vez ao fim da execução.
    fn finish(&mut self) -> Result<(), MonitorError> {
        Ok(())
    }
}

/// Escreve o relatório em CSV, uma linha por vez.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    pub fn create(path: &Path) -> Result<Self, MonitorError> {
        let file = File::create(path)?;
        Self::from_writer(file)
    }
}

impl<W: Write> CsvSink<W> {
    /// O cabeçalho é escrito logo na criação, então um relatório sem lojas
    /// ainda gera um arquivo válido.
    pub fn from_writer(inner: W) -> Result<Self, MonitorError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(ReportRow::HEADER)?;
        Ok(Self { writer })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W, MonitorError> {
        self.writer
            .into_inner()
            .map_err(|e| MonitorError::Io(e.into_error()))
    }
}

impl<W: Write + Send> RowSink for CsvSink<W> {
    fn emit(&mut self, row: &ReportRow) -> Result<(), MonitorError> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), MonitorError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl RowSink for Vec<ReportRow> {
    fn emit(&mut self, row: &ReportRow) -> Result<(), MonitorError> {
        self.push(row.clone());
        Ok(())
    }
}

/// Repassa as linhas para um escritor rodando fora do runtime assíncrono.
pub struct ChannelSink {
    sender: UnboundedSender<ReportRow>,
}

impl RowSink for ChannelSink {
    fn emit(&mut self, row: &ReportRow) -> Result<(), MonitorError> {
        self.sender
            .send(row.clone())
            .map_err(|_| MonitorError::Task("escritor do relatório encerrado".into()))
    }
}

/// Canal ligando um `ChannelSink` ao escritor de `write_csv`.
pub fn row_channel() -> (ChannelSink, UnboundedReceiver<ReportRow>) {
    let (sender, receiver) = unbounded_channel();
    (ChannelSink { sender }, receiver)
}

/// Escreve em `path` cada linha recebida até o canal fechar. Bloqueante:
/// deve rodar em `spawn_blocking`. Retorna quantas linhas foram escritas.
pub fn write_csv(path: &Path, mut rows: UnboundedReceiver<ReportRow>) -> Result<usize, MonitorError> {
    let mut sink = CsvSink::create(path)?;
    let mut written = 0;
    while let Some(row) = rows.blocking_recv() {
        sink.emit(&row)?;
        written += 1;
    }
    sink.finish()?;
    Ok(written)
}
