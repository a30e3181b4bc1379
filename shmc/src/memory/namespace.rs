use core::time::Duration;
use std::{
    collections::{
        HashMap,
        hash_map::Entry,
    },
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

use crate::{
    error::{
        Error::{
            AlreadyExists,
            NotFound,
        },
        Result,
    },
    log::{
        debug,
        info,
    },
    time,
};

use super::area::Area;

/// Внешний арбитр, который раздаёт сторонам сессии области разделяемой памяти по именам.
///
/// Одна сторона создаёт область методом [`Namespace::create()`],
/// остальные находят её методом [`Namespace::attach()`].
/// Несколько независимых [`Namespace`] не пересекаются,
/// что позволяет держать в одном процессе несколько изолированных сессий.
#[derive(Debug, Default)]
pub struct Namespace {
    /// Зарегистрированные области.
    areas: Mutex<HashMap<String, Area>>,
}

impl Namespace {
    /// Создаёт пустое пространство имён.
    pub fn new() -> Self {
        Self::default()
    }

    /// Создаёт и регистрирует область `name` размером не меньше `size` байт.
    /// Если область с таким именем уже есть, возвращает ошибку
    /// [`Error::AlreadyExists`](crate::Error::AlreadyExists).
    pub fn create(
        &self,
        name: &str,
        size: usize,
    ) -> Result<Area> {
        match self.areas().entry(name.to_owned()) {
            Entry::Occupied(_) => Err(AlreadyExists),
            Entry::Vacant(entry) => {
                let area = Area::new(name, size)?;
                info!(area = name, size = %super::Size::bytes(area.size()), "register shared memory area");
                Ok(entry.insert(area).clone())
            },
        }
    }

    /// Находит область `name`.
    /// Если такой области нет, возвращает ошибку [`Error::NotFound`](crate::Error::NotFound).
    pub fn attach(
        &self,
        name: &str,
    ) -> Result<Area> {
        let area = self.areas().get(name).cloned().ok_or(NotFound)?;
        area.validate()?;
        debug!(area = name, "attach shared memory area");
        Ok(area)
    }

    /// Аналогичен [`Namespace::attach()`], но ждёт регистрации области не дольше `timeout`.
    pub fn attach_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Area> {
        time::poll(timeout, || self.attach(name))
    }

    /// Удаляет регистрацию области `name`.
    /// Память области освобождается, когда будет отпущен последний её дескриптор.
    pub fn remove(
        &self,
        name: &str,
    ) -> Result<()> {
        self.areas().remove(name).map(|_| debug!(area = name, "remove shared memory area")).ok_or(NotFound)
    }

    /// Таблица зарегистрированных областей.
    fn areas(&self) -> MutexGuard<'_, HashMap<String, Area>> {
        self.areas.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
